//! Cross-context payment reconciliation.

pub mod channel;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod session;

pub use channel::{
    AdvisoryChannel, CallbackResult, ChannelError, ChannelMessage, InMemoryChannel, PaymentData,
    PAYMENT_DATA_KEY,
};
pub use engine::{
    CheckoutRequest, CheckoutTicket, ReconcileResult, Reconciler, Settlement, SettlementState,
};
pub use error::ReconcileError;
pub use handoff::{
    plan_handoff, CallbackParams, HandoffConfig, HandoffError, HandoffPlan, HandoffReport,
    ProviderFamily, SecondaryContext, WindowHost,
};
pub use session::{PaymentDisplay, PaymentSession, SessionRegistry, VoucherClaim};
