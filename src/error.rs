//! Unified error handling for the checkout reconciler
//!
//! Module errors convert into [`AppError`], which carries the HTTP status,
//! a stable error code and the message shown to the customer.

use crate::config::ConfigError;
use crate::ledger::error::LedgerError;
use crate::orders::error::TransitionError;
use crate::orders::model::PaymentStatus;
use crate::payments::error::GatewayError;
use crate::reconciler::channel::ChannelError;
use crate::reconciler::error::ReconcileError;
use crate::reconciler::handoff::HandoffError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "SESSION_NOT_FOUND")]
    SessionNotFound,
    #[serde(rename = "ORDER_ALREADY_SETTLED")]
    OrderAlreadySettled,
    #[serde(rename = "INSUFFICIENT_POINTS")]
    InsufficientPoints,
    #[serde(rename = "VOUCHER_EXPIRED")]
    VoucherExpired,
    #[serde(rename = "VOUCHER_ALREADY_USED")]
    VoucherAlreadyUsed,
    #[serde(rename = "VOUCHER_NOT_FOUND")]
    VoucherNotFound,
    #[serde(rename = "ORDER_NOT_PAID")]
    OrderNotPaid,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503)
    #[serde(rename = "ORDER_SERVICE_ERROR")]
    OrderServiceError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    OrderNotFound { order_code: String },
    SessionNotFound { order_code: String },
    /// Checkout attempted on an order whose payment already reached a terminal status
    AlreadySettled {
        order_code: String,
        status: PaymentStatus,
    },
    InsufficientPoints { balance: i64, required: i64 },
    VoucherExpired { voucher_id: i64 },
    VoucherAlreadyUsed { voucher_id: i64 },
    VoucherNotFound { voucher_id: i64 },
    OrderNotPaid { order_code: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    /// Advisory channel storage unavailable
    Cache { message: String },
    Configuration { message: String },
}

/// Failures of the external order service
#[derive(Debug, Clone)]
pub enum ExternalError {
    OrderService {
        status: Option<u16>,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    UnknownProvider { provider: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::SessionNotFound { .. } => 404,
                DomainError::AlreadySettled { .. } => 409,
                DomainError::InsufficientPoints { .. } => 422,
                DomainError::VoucherExpired { .. } => 410,
                DomainError::VoucherAlreadyUsed { .. } => 409,
                DomainError::VoucherNotFound { .. } => 404,
                DomainError::OrderNotPaid { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::OrderService {
                    is_retryable: true, ..
                } => 503,
                ExternalError::OrderService { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
                DomainError::AlreadySettled { .. } => ErrorCode::OrderAlreadySettled,
                DomainError::InsufficientPoints { .. } => ErrorCode::InsufficientPoints,
                DomainError::VoucherExpired { .. } => ErrorCode::VoucherExpired,
                DomainError::VoucherAlreadyUsed { .. } => ErrorCode::VoucherAlreadyUsed,
                DomainError::VoucherNotFound { .. } => ErrorCode::VoucherNotFound,
                DomainError::OrderNotPaid { .. } => ErrorCode::OrderNotPaid,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::OrderService { .. } => ErrorCode::OrderServiceError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_code } => {
                    format!("Order '{}' not found", order_code)
                }
                DomainError::SessionNotFound { order_code } => {
                    format!("No active payment for order '{}'", order_code)
                }
                DomainError::AlreadySettled { order_code, status } => {
                    format!("Payment for order '{}' is already {}", order_code, status)
                }
                DomainError::InsufficientPoints { balance, required } => {
                    format!(
                        "Insufficient points. Available: {}, Required: {}",
                        balance, required
                    )
                }
                DomainError::VoucherExpired { .. } => "This voucher is no longer valid".to_string(),
                DomainError::VoucherAlreadyUsed { .. } => {
                    "This voucher has already been used".to_string()
                }
                DomainError::VoucherNotFound { voucher_id } => {
                    format!("Voucher {} not found", voucher_id)
                }
                DomainError::OrderNotPaid { order_code } => {
                    format!("Order '{}' has not been paid yet", order_code)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::OrderService { is_retryable, .. } => {
                    if *is_retryable {
                        "Order service is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Order service rejected the request. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
                ValidationError::UnknownProvider { provider } => {
                    format!("Unknown payment provider '{}'", provider)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::OrderService { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

// Conversions from module error types
// Note: From<DatabaseError> lives in database/error.rs so this module builds without sqlx

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let kind = match err {
            GatewayError::NotFound { resource } => {
                AppErrorKind::Domain(DomainError::OrderNotFound {
                    order_code: resource.rsplit('/').next().unwrap_or_default().to_string(),
                })
            }
            GatewayError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            GatewayError::ServiceError { status: 429, .. } => {
                AppErrorKind::External(ExternalError::RateLimit {
                    service: "order service".to_string(),
                    retry_after: None,
                })
            }
            ref e @ (GatewayError::NetworkError { .. }
            | GatewayError::ServiceError { .. }
            | GatewayError::DecodeError { .. }) => {
                let status = match e {
                    GatewayError::ServiceError { status, .. } => Some(*status),
                    _ => None,
                };
                AppErrorKind::External(ExternalError::OrderService {
                    status,
                    message: e.to_string(),
                    is_retryable: e.is_retryable(),
                })
            }
        };
        AppError::new(kind)
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        let kind = match err {
            TransitionError::NotFound { order_code } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_code })
            }
            TransitionError::InvalidTransition { reason, .. } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "payment_status".to_string(),
                    reason,
                })
            }
        };
        AppError::new(kind)
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::InsufficientPoints { balance, required } => {
                AppErrorKind::Domain(DomainError::InsufficientPoints { balance, required })
            }
            LedgerError::VoucherExpired { voucher_id } => {
                AppErrorKind::Domain(DomainError::VoucherExpired { voucher_id })
            }
            LedgerError::VoucherAlreadyUsed { voucher_id } => {
                AppErrorKind::Domain(DomainError::VoucherAlreadyUsed { voucher_id })
            }
            LedgerError::VoucherNotFound { voucher_id } => {
                AppErrorKind::Domain(DomainError::VoucherNotFound { voucher_id })
            }
            LedgerError::OrderNotPaid { order_code } => {
                AppErrorKind::Domain(DomainError::OrderNotPaid { order_code })
            }
            LedgerError::Upstream(e) => return AppError::from(e),
            LedgerError::Store(message) => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message,
                is_retryable: true,
            }),
        };
        AppError::new(kind)
    }
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}

impl From<HandoffError> for AppError {
    fn from(err: HandoffError) -> Self {
        let kind = match err {
            HandoffError::UnknownProvider(provider) => {
                AppErrorKind::Validation(ValidationError::UnknownProvider { provider })
            }
            HandoffError::Navigation(reason) => AppErrorKind::Validation(ValidationError::InvalidField {
                field: "location".to_string(),
                reason,
            }),
        };
        AppError::new(kind)
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Transition(e) => e.into(),
            ReconcileError::Gateway(e) => e.into(),
            ReconcileError::Channel(e) => e.into(),
            ReconcileError::SessionNotFound { order_code } => AppError::new(AppErrorKind::Domain(
                DomainError::SessionNotFound { order_code },
            )),
            ReconcileError::AlreadySettled { order_code, status } => AppError::new(
                AppErrorKind::Domain(DomainError::AlreadySettled { order_code, status }),
            ),
            ReconcileError::Invalid { field, message } => AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidField {
                    field,
                    reason: message,
                },
            )),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}
