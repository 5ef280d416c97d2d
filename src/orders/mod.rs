pub mod error;
pub mod model;
pub mod state_machine;

pub use error::{TransitionError, UnknownStatus};
pub use model::{DeliveryStatus, Order, OrderTotals, PaymentStatus};
pub use state_machine::{apply, Effect, OrderBook, Outcome, Provenance, StatusEvent, Transition};
