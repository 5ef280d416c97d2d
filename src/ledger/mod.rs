//! Voucher/points redemption, applied at most once per order.

pub mod error;
pub mod redemption;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use redemption::{RedemptionLedger, RedemptionOutcome, RedemptionReceipt};
pub use store::{InMemoryRedemptionStore, InsertOutcome, Redemption, RedemptionStore};
