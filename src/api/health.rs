//! Health check endpoint
//! Reports the ledger database and the advisory channel store

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// The advisory channel is down; settlement still works through polling.
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    fn record(&mut self, component: &str, health: ComponentHealth, failure: HealthState) {
        if health.status == ComponentState::Down {
            self.status = match (self.status, failure) {
                (HealthState::Unhealthy, _) | (_, HealthState::Unhealthy) => HealthState::Unhealthy,
                _ => failure,
            };
        }
        self.checks.insert(component.to_string(), health);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms: None,
            details: Some("in-memory".to_string()),
        }
    }
}

/// Health checker for the backing stores. Either store may be absent, in which
/// case the process runs on its in-memory counterpart.
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    pub db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    pub redis_pool: Option<crate::cache::RedisPool>,
}

impl HealthChecker {
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        #[cfg(feature = "database")]
        {
            let health = match &self.db_pool {
                Some(pool) => probe("database", crate::database::health_check(pool)).await,
                None => ComponentHealth::in_memory(),
            };
            health_status.record("database", health, HealthState::Unhealthy);
        }

        #[cfg(feature = "cache")]
        {
            let health = match &self.redis_pool {
                Some(pool) => probe("advisory_channel", crate::cache::health_check(pool)).await,
                None => ComponentHealth::in_memory(),
            };
            health_status.record("advisory_channel", health, HealthState::Degraded);
        }

        health_status
    }
}

async fn probe<F, E>(component: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match timeout(PROBE_TIMEOUT, check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!("{} health check: OK ({}ms)", component, elapsed);
            ComponentHealth::up(Some(elapsed))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", component, e);
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            warn!("{} health check timed out", component);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(health_status.is_healthy());
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_channel_outage_only_degrades() {
        let mut status = HealthStatus::new();
        status.record("database", ComponentHealth::up(Some(3)), HealthState::Unhealthy);
        status.record(
            "advisory_channel",
            ComponentHealth::down(Some("connection refused".to_string())),
            HealthState::Degraded,
        );
        assert_eq!(status.status, HealthState::Degraded);

        status.record("database", ComponentHealth::down(None), HealthState::Unhealthy);
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[test]
    fn test_degraded_never_masks_unhealthy() {
        let mut status = HealthStatus::new();
        status.record("database", ComponentHealth::down(None), HealthState::Unhealthy);
        status.record("advisory_channel", ComponentHealth::down(None), HealthState::Degraded);
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_unconfigured_stores_report_in_memory() {
        let status = HealthChecker::default().check_health().await;
        assert!(status.is_healthy());
        for health in status.checks.values() {
            assert_eq!(health.details.as_deref(), Some("in-memory"));
        }
    }

    #[tokio::test]
    async fn test_probe_reports_failure_detail() {
        let health = probe("database", async { Err::<(), _>("refused") }).await;
        assert_eq!(health.status, ComponentState::Down);
        assert_eq!(health.details.as_deref(), Some("refused"));
    }
}
