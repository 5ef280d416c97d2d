use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Order not found: {order_code}")]
    NotFound { order_code: String },

    #[error("Invalid transition for order {order_code}: {reason}")]
    InvalidTransition { order_code: String, reason: String },
}

/// A status string that maps to no known lifecycle state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown status value: {0}")]
pub struct UnknownStatus(pub String);
