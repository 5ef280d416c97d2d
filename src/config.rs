//! Environment-driven configuration
//!
//! `.env` is loaded first, then each section reads its variables with defaults
//! and validates itself.

use crate::payments::client::GatewayConfig;
use crate::reconciler::handoff::HandoffConfig;
use crate::workers::payment_poller::PollerConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Absent when `DATABASE_URL` is unset; the ledger then lives in memory.
    pub database: Option<DatabaseConfig>,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub poller: PollerConfig,
    pub handoff: HandoffConfig,
    /// How long a settled or cancelled order stays answerable to `/wait`.
    pub order_retention: Duration,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Ledger database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Advisory channel storage
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Absent when `REDIS_URL` is unset; the channel then lives in memory.
    pub redis_url: Option<String>,
    pub channel_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            poller: PollerConfig::from_env()?,
            handoff: HandoffConfig::from_env()?,
            order_retention: Duration::from_secs(parse_var("ORDER_RETENTION_SECS", 900)?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.cache.validate()?;
        self.logging.validate()?;

        if self.poller.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_POLL_INTERVAL_SECS".to_string(),
            ));
        }
        if self.poller.max_duration < self.poller.interval {
            return Err(ConfigError::ValidationFailed(
                "PAYMENT_POLL_MAX_DURATION_SECS must be >= PAYMENT_POLL_INTERVAL_SECS".to_string(),
            ));
        }
        // An order being polled must not be forgotten mid-wait
        if self.order_retention < self.poller.max_duration {
            return Err(ConfigError::ValidationFailed(
                "ORDER_RETENTION_SECS must be >= PAYMENT_POLL_MAX_DURATION_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

/// Reads `key`, falling back to `default` when unset
fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: optional_var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.port, self.host.is_empty()) {
            (0, _) => Err(ConfigError::InvalidValue("SERVER_PORT=0".to_string())),
            (_, true) => Err(ConfigError::InvalidValue("SERVER_HOST is empty".to_string())),
            _ => Ok(()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(url) = optional_var("DATABASE_URL") else {
            return Ok(None);
        };

        Ok(Some(DatabaseConfig {
            url,
            max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", 1)?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", 10)?,
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::ValidationFailed(
                "DATABASE_URL is not a postgres:// url".to_string(),
            ));
        }
        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationFailed(format!(
                "ledger pool bounds {}..{} are inverted or empty",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: optional_var("REDIS_URL"),
            channel_ttl: parse_var("CHANNEL_TTL_SECS", 3600)?,
            max_connections: parse_var("CACHE_MAX_CONNECTIONS", 8)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::ValidationFailed(
                    "REDIS_URL is not a redis:// url".to_string(),
                ));
            }
        }
        if self.channel_ttl == 0 {
            return Err(ConfigError::InvalidValue("CHANNEL_TTL_SECS=0".to_string()));
        }
        Ok(())
    }

    pub fn channel_ttl(&self) -> Duration {
        Duration::from_secs(self.channel_ttl)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = optional_var("ORDER_SERVICE_BASE_URL")
            .ok_or_else(|| ConfigError::ValidationFailed("ORDER_SERVICE_BASE_URL is required".to_string()))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(
                "ORDER_SERVICE_BASE_URL is not an http(s) url".to_string(),
            ));
        }

        Ok(GatewayConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: optional_var("ORDER_SERVICE_TOKEN"),
            timeout_secs: parse_var("ORDER_SERVICE_TIMEOUT_SECS", GatewayConfig::default().timeout_secs)?,
        })
    }
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = PollerConfig::default();
        Ok(PollerConfig {
            interval: Duration::from_secs(parse_var(
                "PAYMENT_POLL_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            max_duration: Duration::from_secs(parse_var(
                "PAYMENT_POLL_MAX_DURATION_SECS",
                defaults.max_duration.as_secs(),
            )?),
        })
    }
}

impl HandoffConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = HandoffConfig::default();
        let waiting_route = optional_var("HANDOFF_WAITING_ROUTE").unwrap_or(defaults.waiting_route);
        if !waiting_route.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "HANDOFF_WAITING_ROUTE={}",
                waiting_route
            )));
        }
        Ok(HandoffConfig {
            close_delay: Duration::from_millis(parse_var(
                "HANDOFF_CLOSE_DELAY_MS",
                defaults.close_delay.as_millis() as u64,
            )?),
            waiting_route,
        })
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match optional_var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        };
        Ok(LoggingConfig {
            level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if LEVELS.contains(&self.level.to_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue(format!("LOG_LEVEL={}", self.level)))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value {0}")]
    InvalidValue(String),

    #[error("configuration rejected: {0}")]
    ValidationFailed(String),
}
