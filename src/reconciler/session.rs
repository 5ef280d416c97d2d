use crate::orders::model::PaymentStatus;
use crate::payments::types::{PaymentMethod, ProcessPaymentResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Voucher and extra points the customer asked to redeem for this order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoucherClaim {
    pub voucher_id: i64,
    #[serde(default)]
    pub points: i64,
}

/// What the gateway handed back for the customer to complete the payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentDisplay {
    pub expired_at: Option<DateTime<Utc>>,
    pub qr_code_url: Option<String>,
    pub deeplink: Option<String>,
    pub va_number: Option<String>,
    pub payment_code: Option<String>,
    pub company_code: Option<String>,
}

impl From<&ProcessPaymentResponse> for PaymentDisplay {
    fn from(response: &ProcessPaymentResponse) -> Self {
        Self {
            expired_at: response.expired_at,
            qr_code_url: response.qr_code_url.clone(),
            deeplink: response.deeplink.clone(),
            va_number: response.va_number.clone(),
            payment_code: response.payment_code.clone(),
            company_code: response.company_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaymentSession {
    pub order_code: String,
    pub profile_id: String,
    pub method: PaymentMethod,
    pub session_token: Uuid,
    pub last_known_status: PaymentStatus,
    pub voucher: Option<VoucherClaim>,
    pub display: PaymentDisplay,
    pub created_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(
        order_code: impl Into<String>,
        profile_id: impl Into<String>,
        method: PaymentMethod,
        voucher: Option<VoucherClaim>,
    ) -> Self {
        Self {
            order_code: order_code.into(),
            profile_id: profile_id.into(),
            method,
            session_token: Uuid::new_v4(),
            last_known_status: PaymentStatus::Unpaid,
            voucher,
            display: PaymentDisplay::default(),
            created_at: Utc::now(),
        }
    }

    /// Where the customer goes to complete the payment, for redirect methods.
    /// Deeplinks win over QR pages.
    pub fn redirect_target(&self) -> Option<&str> {
        if !self.method.category.requires_redirect() {
            return None;
        }
        self.display
            .deeplink
            .as_deref()
            .or(self.display.qr_code_url.as_deref())
    }
}

/// Live payment sessions, at most one per order code.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, PaymentSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `session`, superseding any prior session for the same order.
    pub async fn open(&self, session: PaymentSession) -> Option<PaymentSession> {
        self.sessions
            .write()
            .await
            .insert(session.order_code.clone(), session)
    }

    pub async fn get(&self, order_code: &str) -> Option<PaymentSession> {
        self.sessions.read().await.get(order_code).cloned()
    }

    pub async fn is_current(&self, order_code: &str, token: Uuid) -> bool {
        self.sessions
            .read()
            .await
            .get(order_code)
            .map(|s| s.session_token == token)
            .unwrap_or(false)
    }

    pub async fn record_status(&self, order_code: &str, status: PaymentStatus) {
        if let Some(session) = self.sessions.write().await.get_mut(order_code) {
            session.last_known_status = status;
        }
    }

    pub async fn close(&self, order_code: &str) -> Option<PaymentSession> {
        self.sessions.write().await.remove(order_code)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
