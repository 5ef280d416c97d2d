use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures talking to the external order/payment service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Order service error: status={status}, message={message}")]
    ServiceError { status: u16, message: String },

    #[error("Invalid order service response: {message}")]
    DecodeError { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::NotFound { .. } => false,
            GatewayError::ValidationError { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::ServiceError { status, .. } => *status >= 500 || *status == 429,
            GatewayError::DecodeError { .. } => false,
        }
    }
}
