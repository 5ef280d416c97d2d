use crate::ledger::error::LedgerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One applied voucher/points redemption. At most one exists per order code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Redemption {
    pub order_code: String,
    pub voucher_id: i64,
    pub points_debited: i64,
    pub applied: bool,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Redemption),
    /// An entry for the order code already existed; it is returned unchanged.
    Existing(Redemption),
}

/// Persistence for redemption entries.
///
/// `insert_if_absent` must be atomic per order code: of two concurrent inserts
/// for the same order, exactly one returns `Inserted`.
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    async fn find(&self, order_code: &str) -> LedgerResult<Option<Redemption>>;

    async fn insert_if_absent(&self, redemption: Redemption) -> LedgerResult<InsertOutcome>;
}

#[derive(Debug, Default)]
pub struct InMemoryRedemptionStore {
    entries: RwLock<HashMap<String, Redemption>>,
}

impl InMemoryRedemptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl RedemptionStore for InMemoryRedemptionStore {
    async fn find(&self, order_code: &str) -> LedgerResult<Option<Redemption>> {
        Ok(self.entries.read().await.get(order_code).cloned())
    }

    async fn insert_if_absent(&self, redemption: Redemption) -> LedgerResult<InsertOutcome> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&redemption.order_code) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        entries.insert(redemption.order_code.clone(), redemption.clone());
        Ok(InsertOutcome::Inserted(redemption))
    }
}
