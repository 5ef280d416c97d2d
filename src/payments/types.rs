use crate::payments::error::GatewayError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCategory {
    EWallet,
    Qr,
    VirtualAccount,
    Direct,
}

impl PaymentCategory {
    /// E-wallet and QR payments are completed in a provider page opened in a
    /// second browser context.
    pub fn requires_redirect(&self) -> bool {
        matches!(self, PaymentCategory::EWallet | PaymentCategory::Qr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentCategory::EWallet => "e_wallet",
            PaymentCategory::Qr => "qr",
            PaymentCategory::VirtualAccount => "virtual_account",
            PaymentCategory::Direct => "direct",
        }
    }
}

impl std::fmt::Display for PaymentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentCategory {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "e_wallet" | "ewallet" | "e-wallet" => Ok(PaymentCategory::EWallet),
            "qr" | "qris" => Ok(PaymentCategory::Qr),
            "virtual_account" | "va" => Ok(PaymentCategory::VirtualAccount),
            "direct" => Ok(PaymentCategory::Direct),
            _ => Err(GatewayError::ValidationError {
                message: format!("unsupported payment category: {}", value),
                field: Some("payment_method.category".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethod {
    pub code: String,
    pub category: PaymentCategory,
}

// ----------------------------------------------------------------------------
// POST /payment/process
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentRequest {
    pub order_code: String,
    pub payment_method_code: String,
    pub shipping_address: String,
    pub shipping_recipient_name: String,
    pub shipping_recipient_phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentResponse {
    pub order_code: String,
    pub payment_method: String,
    /// Raw status; the state machine decides whether it is usable.
    pub payment_status: String,
    pub grand_total: Decimal,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub deeplink: Option<String>,
    #[serde(default)]
    pub va_number: Option<String>,
    #[serde(default)]
    pub payment_code: Option<String>,
    #[serde(default)]
    pub company_code: Option<String>,
}

// ----------------------------------------------------------------------------
// POST /payment/check-status
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStatusRequest {
    pub order_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStatusResponse {
    pub payment_status: String,
    #[serde(default)]
    pub transaction_status: Option<String>,
    pub order_code: String,
}

// ----------------------------------------------------------------------------
// GET /customer/vouchers, GET /customer/points
// ----------------------------------------------------------------------------

/// A voucher instance held by the customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerVoucher {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub required_points: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub is_used: bool,
}

impl CustomerVoucher {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_date && at <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerPoints {
    #[serde(alias = "points")]
    pub balance: i64,
}
