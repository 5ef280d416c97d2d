use crate::orders::error::UnknownStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Payment status lattice
// ============================================================================

/// Payment side of an order's lifecycle.
///
/// Statuses form a small ranked lattice: `unpaid(0) < pending(1) < paid(2)`,
/// with `expired(2)` and `refunded(3)` absorbing once reached. The state
/// machine only ever moves an order up this lattice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn rank(self) -> u8 {
        match self {
            PaymentStatus::Unpaid => 0,
            PaymentStatus::Pending => 1,
            PaymentStatus::Paid | PaymentStatus::Expired => 2,
            PaymentStatus::Refunded => 3,
        }
    }

    /// No further automatic transition happens from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Expired | PaymentStatus::Refunded
        )
    }

    /// Absorbing statuses accept no transition at all, including admin ones.
    pub fn is_absorbing(self) -> bool {
        matches!(self, PaymentStatus::Expired | PaymentStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "pending" | "waiting" => Ok(PaymentStatus::Pending),
            "paid" | "success" | "settlement" => Ok(PaymentStatus::Paid),
            "expired" | "expire" => Ok(PaymentStatus::Expired),
            "refunded" | "refund" => Ok(PaymentStatus::Refunded),
            _ => Err(UnknownStatus(value.to_string())),
        }
    }
}

// ============================================================================
// Delivery status
// ============================================================================

/// Fulfilment side of an order, advanced by delivery events independently of
/// payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Shipping,
    Delivered,
    Completed,
    Cancelled,
}

impl DeliveryStatus {
    fn position(self) -> Option<u8> {
        match self {
            DeliveryStatus::Pending => Some(0),
            DeliveryStatus::Processing => Some(1),
            DeliveryStatus::Shipping => Some(2),
            DeliveryStatus::Delivered => Some(3),
            DeliveryStatus::Completed => Some(4),
            DeliveryStatus::Cancelled => None,
        }
    }

    /// Returns the new status if `next` is a forward move, `None` if the
    /// report is late, duplicated or not allowed.
    pub fn advance(self, next: DeliveryStatus) -> Option<DeliveryStatus> {
        match (self, next) {
            (DeliveryStatus::Cancelled, _) | (DeliveryStatus::Completed, _) => None,
            (_, DeliveryStatus::Cancelled) => Some(DeliveryStatus::Cancelled),
            (current, next) => match (current.position(), next.position()) {
                (Some(from), Some(to)) if to > from => Some(next),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Shipping => "shipping",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Completed => "completed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "processing" => Ok(DeliveryStatus::Processing),
            "shipping" | "shipped" => Ok(DeliveryStatus::Shipping),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "completed" => Ok(DeliveryStatus::Completed),
            "cancelled" | "canceled" => Ok(DeliveryStatus::Cancelled),
            _ => Err(UnknownStatus(value.to_string())),
        }
    }
}

// ============================================================================
// Order
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderTotals {
    pub sub_total: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub shipping_fee: Decimal,
    #[serde(default)]
    pub admin_fee: Decimal,
    pub grand_total: Decimal,
}

impl OrderTotals {
    pub fn new(
        sub_total: Decimal,
        discount: Decimal,
        shipping_fee: Decimal,
        admin_fee: Decimal,
    ) -> Self {
        Self {
            sub_total,
            discount,
            shipping_fee,
            admin_fee,
            grand_total: sub_total - discount + shipping_fee + admin_fee,
        }
    }

    /// `grand_total` must equal the sub total less discount plus both fees.
    pub fn is_consistent(&self) -> bool {
        self.grand_total == self.sub_total - self.discount + self.shipping_fee + self.admin_fee
    }
}

/// Snapshot of one order as held by the primary context.
///
/// The external order service is authoritative; this copy only ever moves
/// forward as authoritative reports arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub code: String,
    #[serde(flatten)]
    pub totals: OrderTotals,
    pub status: DeliveryStatus,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(code: impl Into<String>, totals: OrderTotals) -> Self {
        Self {
            code: code.into(),
            totals,
            status: DeliveryStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            paid_at: None,
            expired_at: None,
        }
    }

    /// Applies a delivery event; returns whether the status moved.
    pub fn advance_delivery(&mut self, next: DeliveryStatus) -> bool {
        match self.status.advance(next) {
            Some(status) => {
                self.status = status;
                true
            }
            None => false,
        }
    }
}
