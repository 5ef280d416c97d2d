use crate::orders::error::TransitionError;
use crate::orders::model::PaymentStatus;
use crate::payments::error::GatewayError;
use crate::reconciler::channel::ChannelError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("No payment session for order {order_code}")]
    SessionNotFound { order_code: String },

    #[error("Order {order_code} is already {status}")]
    AlreadySettled {
        order_code: String,
        status: PaymentStatus,
    },

    #[error("Invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ReconcileError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ReconcileError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
