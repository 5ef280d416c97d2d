//! Redis-backed advisory channel

use super::error::{CacheError, CacheResult};
use super::keys::channel::{InboxKey, PaymentDataKey};
use super::RedisPool;
use crate::reconciler::channel::{AdvisoryChannel, ChannelMessage, ChannelResult, PaymentData};
use async_trait::async_trait;
use redis::Script;
use std::time::Duration;
use tracing::{debug, warn};

/// Deletes the payment record only while it still names the given order.
const CLEAR_IF_MATCHES: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local ok, data = pcall(cjson.decode, raw)
if ok and data['order_code'] == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisAdvisoryChannel {
    pool: RedisPool,
    ttl: Duration,
}

impl RedisAdvisoryChannel {
    pub fn new(pool: RedisPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    async fn set_json(&self, key: &str, payload: &str) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut *conn)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl AdvisoryChannel for RedisAdvisoryChannel {
    async fn write_payment_data(&self, profile_id: &str, data: &PaymentData) -> ChannelResult<()> {
        let key = PaymentDataKey::new(profile_id).to_string();
        let payload = serde_json::to_string(data).map_err(CacheError::from)?;
        self.set_json(&key, &payload).await?;
        debug!(key = %key, order_code = %data.order_code, "payment record written");
        Ok(())
    }

    async fn read_payment_data(&self, profile_id: &str) -> ChannelResult<Option<PaymentData>> {
        let key = PaymentDataKey::new(profile_id).to_string();
        match self.get_raw(&key).await? {
            Some(raw) => {
                let data = serde_json::from_str(&raw).map_err(CacheError::from)?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn clear_payment_data(&self, profile_id: &str, order_code: &str) -> ChannelResult<bool> {
        let key = PaymentDataKey::new(profile_id).to_string();
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let removed: i64 = Script::new(CLEAR_IF_MATCHES)
            .key(&key)
            .arg(order_code)
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;
        Ok(removed == 1)
    }

    async fn publish(&self, profile_id: &str, message: ChannelMessage) -> ChannelResult<()> {
        let key = InboxKey::new(profile_id).to_string();
        let payload = serde_json::to_string(&message).map_err(CacheError::from)?;
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl.as_secs().max(1))
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }

    async fn drain(&self, profile_id: &str) -> ChannelResult<Vec<ChannelMessage>> {
        let key = InboxKey::new(profile_id).to_string();
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let (raw,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<ChannelMessage>(&entry) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(key = %key, error = %e, "skipping malformed advisory message"),
            }
        }
        Ok(messages)
    }
}
