use crate::payments::error::GatewayError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Redemption failures. None of them is written to the store, and none of them
/// touches the order's payment status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient points: balance={balance}, required={required}")]
    InsufficientPoints { balance: i64, required: i64 },

    #[error("Voucher {voucher_id} is outside its validity window")]
    VoucherExpired { voucher_id: i64 },

    #[error("Voucher {voucher_id} has already been used")]
    VoucherAlreadyUsed { voucher_id: i64 },

    #[error("Voucher {voucher_id} not found")]
    VoucherNotFound { voucher_id: i64 },

    #[error("Order {order_code} is not paid")]
    OrderNotPaid { order_code: String },

    #[error("Customer data unavailable: {0}")]
    Upstream(#[from] GatewayError),

    #[error("Redemption store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            LedgerError::VoucherExpired { .. } => "VOUCHER_EXPIRED",
            LedgerError::VoucherAlreadyUsed { .. } => "VOUCHER_ALREADY_USED",
            LedgerError::VoucherNotFound { .. } => "VOUCHER_NOT_FOUND",
            LedgerError::OrderNotPaid { .. } => "ORDER_NOT_PAID",
            LedgerError::Upstream(_) => "CUSTOMER_DATA_UNAVAILABLE",
            LedgerError::Store(_) => "LEDGER_STORE_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Upstream(e) => e.is_retryable(),
            LedgerError::Store(_) => true,
            _ => false,
        }
    }
}
