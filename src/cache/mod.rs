//! Redis layer backing the advisory channel
//!
//! The pool tolerates Redis being down at startup: the channel is advisory, so
//! failed reads and writes are logged by callers and never block settlement.

pub mod channel;
pub mod error;
pub mod keys;

pub use channel::RedisAdvisoryChannel;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

use error::CacheError;

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Redis pool configuration
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 8,
            min_idle: 1,
            connection_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Builds the pool. An unreachable Redis is logged, not fatal.
pub async fn init_cache_pool(config: RedisPoolConfig) -> Result<RedisPool, CacheError> {
    info!(
        max_connections = config.max_connections,
        "Connecting advisory channel to Redis"
    );

    let manager = RedisConnectionManager::new(config.redis_url.as_str())
        .map_err(|e| CacheError::ConnectionError(format!("invalid redis url: {}", e)))?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .build(manager)
        .await?;

    if let Err(e) = health_check(&pool).await {
        warn!(error = %e, "Redis not answering yet; advisories will be dropped until it is");
    }

    Ok(pool)
}

/// PING through the pool
pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}
