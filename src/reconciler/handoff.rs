//! Secondary-context handoff after a provider callback.
//!
//! The provider page lands the customer in a second tab. That tab never
//! touches order state: it confirms, tries to close itself, and if the browser
//! refuses, sends the customer back to the waiting route of the primary tab.

use crate::reconciler::channel::{AdvisoryChannel, CallbackResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("Unknown payment provider: {0}")]
    UnknownProvider(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    Dana,
    ShopeePay,
    Qris,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Dana => "dana",
            ProviderFamily::ShopeePay => "shopeepay",
            ProviderFamily::Qris => "qris",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            ProviderFamily::Dana => "DANA",
            ProviderFamily::ShopeePay => "ShopeePay",
            ProviderFamily::Qris => "QRIS",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderFamily {
    type Err = HandoffError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "dana" => Ok(ProviderFamily::Dana),
            "shopeepay" | "shopee_pay" | "shopee" => Ok(ProviderFamily::ShopeePay),
            "qris" | "qr" => Ok(ProviderFamily::Qris),
            other => Err(HandoffError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// How long the confirmation stays up before the tab tries to close.
    pub close_delay: Duration,
    /// Route of the primary context that waits for settlement.
    pub waiting_route: String,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            close_delay: Duration::from_millis(1500),
            waiting_route: "/payment/waiting".to_string(),
        }
    }
}

/// Query parameters of a provider callback.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CallbackParams {
    pub profile_id: String,
    #[serde(default)]
    pub order_code: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

impl CallbackParams {
    /// Unknown or missing results count as completed; the poller decides anyway.
    pub fn callback_result(&self) -> CallbackResult {
        self.result
            .as_deref()
            .map(|r| r.parse().unwrap_or(CallbackResult::Completed))
            .unwrap_or(CallbackResult::Completed)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HandoffPlan {
    pub family: ProviderFamily,
    pub message: String,
    pub close_after_ms: u64,
    pub order_code: Option<String>,
    /// Where to send the tab if it may not close itself.
    pub fallback_location: Option<String>,
}

fn confirmation_message(family: ProviderFamily, result: CallbackResult) -> String {
    match result {
        CallbackResult::Completed => format!(
            "{} payment submitted. This window will close and your order status will update shortly.",
            family.display_name()
        ),
        CallbackResult::Dismissed => format!(
            "{} payment window closed. Return to checkout to see your payment status.",
            family.display_name()
        ),
    }
}

/// Builds the secondary context's plan for a provider callback.
///
/// The order code comes from the channel's payment record, or from the
/// callback when the record is missing or unreadable.
pub async fn plan_handoff(
    family: ProviderFamily,
    callback: &CallbackParams,
    channel: &dyn AdvisoryChannel,
    config: &HandoffConfig,
) -> HandoffPlan {
    let from_channel = match channel.read_payment_data(&callback.profile_id).await {
        Ok(data) => data.map(|d| d.order_code),
        Err(e) => {
            warn!(
                profile_id = %callback.profile_id,
                family = %family,
                error = %e,
                "payment record unreadable, using callback order code"
            );
            None
        }
    };
    let order_code = from_channel.or_else(|| callback.order_code.clone());
    let fallback_location = order_code
        .as_ref()
        .map(|code| format!("{}?order_code={}", config.waiting_route, code));

    debug!(
        family = %family,
        order_code = ?order_code,
        "handoff planned"
    );

    HandoffPlan {
        family,
        message: confirmation_message(family, callback.callback_result()),
        close_after_ms: config.close_delay.as_millis() as u64,
        order_code,
        fallback_location,
    }
}

/// The browser window the secondary context runs in.
#[async_trait]
pub trait WindowHost: Send + Sync {
    async fn show_confirmation(&self, message: &str);

    /// Returns false when the browser refuses to close the window.
    async fn try_close(&self) -> bool;

    async fn navigate(&self, location: &str) -> Result<(), HandoffError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandoffReport {
    Closed,
    NavigatedBack { location: String },
    /// Could neither close nor navigate; the customer must switch tabs manually.
    Stranded,
}

pub struct SecondaryContext<H> {
    host: H,
}

impl<H: WindowHost> SecondaryContext<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub async fn run(&self, plan: &HandoffPlan) -> HandoffReport {
        self.host.show_confirmation(&plan.message).await;
        tokio::time::sleep(Duration::from_millis(plan.close_after_ms)).await;

        if self.host.try_close().await {
            return HandoffReport::Closed;
        }

        let Some(location) = plan.fallback_location.as_deref() else {
            warn!(family = %plan.family, "window stayed open and no order code is known");
            return HandoffReport::Stranded;
        };

        match self.host.navigate(location).await {
            Ok(()) => {
                info!(family = %plan.family, location = %location, "navigated back to waiting route");
                HandoffReport::NavigatedBack {
                    location: location.to_string(),
                }
            }
            Err(e) => {
                warn!(family = %plan.family, error = %e, "fallback navigation failed");
                HandoffReport::Stranded
            }
        }
    }
}
