pub mod client;
pub mod error;
pub mod gateway;
pub mod types;

pub use client::{GatewayConfig, HttpPaymentGateway};
pub use error::{GatewayError, GatewayResult};
pub use gateway::PaymentGateway;
