//! Background workers.

pub mod payment_poller;

pub use payment_poller::{
    PaymentPoller, PollError, PollItem, PollOutcome, PollerConfig, StatusSnapshot,
};
