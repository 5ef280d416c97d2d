use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::store::{InsertOutcome, Redemption, RedemptionStore};
use crate::orders::model::{Order, PaymentStatus};
use crate::payments::gateway::PaymentGateway;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionReceipt {
    Applied(Redemption),
    AlreadyApplied(Redemption),
}

impl RedemptionReceipt {
    pub fn redemption(&self) -> &Redemption {
        match self {
            RedemptionReceipt::Applied(r) | RedemptionReceipt::AlreadyApplied(r) => r,
        }
    }
}

/// What happened to an order's redemption, as reported to the waiting client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RedemptionOutcome {
    /// The order carried no voucher claim.
    NotRequested,
    Applied(Redemption),
    AlreadyApplied(Redemption),
    /// Redemption failed; the payment itself stays confirmed.
    Rejected { code: String, reason: String },
}

impl From<RedemptionReceipt> for RedemptionOutcome {
    fn from(receipt: RedemptionReceipt) -> Self {
        match receipt {
            RedemptionReceipt::Applied(r) => RedemptionOutcome::Applied(r),
            RedemptionReceipt::AlreadyApplied(r) => RedemptionOutcome::AlreadyApplied(r),
        }
    }
}

impl From<&LedgerError> for RedemptionOutcome {
    fn from(err: &LedgerError) -> Self {
        RedemptionOutcome::Rejected {
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }
}

pub struct RedemptionLedger {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn RedemptionStore>,
}

impl RedemptionLedger {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn RedemptionStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn existing(&self, order_code: &str) -> LedgerResult<Option<Redemption>> {
        self.store.find(order_code).await
    }

    /// Applies the voucher claim of a paid order.
    ///
    /// A prior entry for the order makes this a no-op returning that entry.
    /// The debit is the larger of the voucher's `required_points` and the
    /// requested `points`.
    pub async fn redeem(
        &self,
        order: &Order,
        voucher_id: i64,
        points: i64,
    ) -> LedgerResult<RedemptionReceipt> {
        if let Some(existing) = self.store.find(&order.code).await? {
            info!(order_code = %order.code, "redemption already applied");
            return Ok(RedemptionReceipt::AlreadyApplied(existing));
        }

        if order.payment_status != PaymentStatus::Paid {
            return Err(LedgerError::OrderNotPaid {
                order_code: order.code.clone(),
            });
        }

        let vouchers = self.gateway.list_vouchers().await?;
        let voucher = vouchers
            .into_iter()
            .find(|v| v.id == voucher_id)
            .ok_or(LedgerError::VoucherNotFound { voucher_id })?;

        if voucher.is_used {
            return Err(LedgerError::VoucherAlreadyUsed { voucher_id });
        }

        let now = Utc::now();
        if !voucher.is_active_at(now) {
            return Err(LedgerError::VoucherExpired { voucher_id });
        }

        let required = voucher.required_points.max(points);
        let balance = self.gateway.customer_points().await?.balance;
        if balance < required {
            warn!(
                order_code = %order.code,
                voucher_id,
                balance,
                required,
                "redemption rejected: insufficient points"
            );
            return Err(LedgerError::InsufficientPoints { balance, required });
        }

        let entry = Redemption {
            order_code: order.code.clone(),
            voucher_id,
            points_debited: required,
            applied: true,
            applied_at: now,
        };
        match self.store.insert_if_absent(entry).await? {
            InsertOutcome::Inserted(redemption) => {
                info!(
                    order_code = %redemption.order_code,
                    voucher_id = redemption.voucher_id,
                    points_debited = redemption.points_debited,
                    "redemption applied"
                );
                Ok(RedemptionReceipt::Applied(redemption))
            }
            InsertOutcome::Existing(redemption) => Ok(RedemptionReceipt::AlreadyApplied(redemption)),
        }
    }
}
