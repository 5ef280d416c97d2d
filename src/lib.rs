//! Checkout payment reconciliation.
//!
//! Drives an order's payment lifecycle to its true terminal state while the
//! customer may be bouncing between the checkout page and an external wallet
//! or QR provider opened in a second tab.

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod orders;
pub mod payments;
pub mod reconciler;
pub mod workers;

#[cfg(feature = "cache")]
pub mod cache;
#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod middleware;
