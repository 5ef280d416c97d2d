//! HTTP surface

pub mod callbacks;
pub mod health;
pub mod payments;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;

use crate::reconciler::{AdvisoryChannel, HandoffConfig, Reconciler};
use health::HealthChecker;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub channel: Arc<dyn AdvisoryChannel>,
    pub handoff: HandoffConfig,
    /// Flips to true on shutdown; running waits return `cancelled`.
    pub shutdown: watch::Receiver<bool>,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/payment/checkout", post(payments::checkout))
        .route("/payment/{order_code}/wait", get(payments::wait))
        .route("/payment/{order_code}/cancel", post(payments::cancel))
        .route("/payment/callback/{family}", get(callbacks::provider_callback))
        .with_state(state)
}
