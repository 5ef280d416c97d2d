use crate::reconciler::channel::ChannelError;

/// Failures talking to Redis
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Unreachable, pool exhausted or command rejected
    #[error("redis unavailable: {0}")]
    ConnectionError(String),
    #[error("advisory payload does not decode: {0}")]
    SerializationError(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        CacheError::ConnectionError(format!("pool: {}", err))
    }
}

impl From<CacheError> for ChannelError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::SerializationError(msg) => ChannelError::Serialization(msg),
            other => ChannelError::Unavailable(other.to_string()),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
