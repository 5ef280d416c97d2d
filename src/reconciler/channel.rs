//! Durable channel shared by the primary and secondary browser contexts.
//!
//! Everything carried here is advisory. The secondary context uses it to find
//! its way back to the waiting route, and the primary context uses its messages
//! only as a prompt to ask the order service again.

use crate::orders::state_machine::Provenance;
use crate::reconciler::handoff::ProviderFamily;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Channel key of the payment record, scoped by browser profile.
pub const PAYMENT_DATA_KEY: &str = "payment_data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentData {
    pub order_code: String,
    pub payment_method: String,
    pub grand_total: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackResult {
    /// The provider reported the flow as finished.
    Completed,
    /// The customer left the provider page without finishing.
    Dismissed,
}

impl std::str::FromStr for CallbackResult {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "completed" | "success" | "finish" => Ok(CallbackResult::Completed),
            "dismissed" | "cancel" | "cancelled" | "close" => Ok(CallbackResult::Dismissed),
            other => Err(format!("unknown callback result: {}", other)),
        }
    }
}

/// A hint from the secondary context that something happened at the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMessage {
    pub provenance: Provenance,
    #[serde(default)]
    pub order_code: Option<String>,
    pub family: ProviderFamily,
    pub result: CallbackResult,
    pub sent_at: DateTime<Utc>,
}

impl ChannelMessage {
    pub fn advisory(
        order_code: Option<String>,
        family: ProviderFamily,
        result: CallbackResult,
    ) -> Self {
        Self {
            provenance: Provenance::Advisory,
            order_code,
            family,
            result,
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Advisory channel unavailable: {0}")]
    Unavailable(String),

    #[error("Advisory channel payload invalid: {0}")]
    Serialization(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

#[async_trait]
pub trait AdvisoryChannel: Send + Sync {
    async fn write_payment_data(&self, profile_id: &str, data: &PaymentData) -> ChannelResult<()>;

    async fn read_payment_data(&self, profile_id: &str) -> ChannelResult<Option<PaymentData>>;

    /// Removes the payment record only if it still belongs to `order_code`.
    async fn clear_payment_data(&self, profile_id: &str, order_code: &str) -> ChannelResult<bool>;

    async fn publish(&self, profile_id: &str, message: ChannelMessage) -> ChannelResult<()>;

    /// Takes every pending message for the profile, oldest first.
    async fn drain(&self, profile_id: &str) -> ChannelResult<Vec<ChannelMessage>>;
}

#[derive(Debug, Default)]
struct ProfileSlot {
    payment_data: Option<PaymentData>,
    inbox: Vec<ChannelMessage>,
}

impl ProfileSlot {
    fn is_empty(&self) -> bool {
        self.payment_data.is_none() && self.inbox.is_empty()
    }
}

/// Process-local channel, used when no Redis is configured and in tests.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    profiles: RwLock<HashMap<String, ProfileSlot>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of profiles holding a record or pending messages.
    pub async fn profile_count(&self) -> usize {
        self.profiles.read().await.len()
    }
}

#[async_trait]
impl AdvisoryChannel for InMemoryChannel {
    async fn write_payment_data(&self, profile_id: &str, data: &PaymentData) -> ChannelResult<()> {
        let mut profiles = self.profiles.write().await;
        profiles.entry(profile_id.to_string()).or_default().payment_data = Some(data.clone());
        Ok(())
    }

    async fn read_payment_data(&self, profile_id: &str) -> ChannelResult<Option<PaymentData>> {
        Ok(self
            .profiles
            .read()
            .await
            .get(profile_id)
            .and_then(|slot| slot.payment_data.clone()))
    }

    async fn clear_payment_data(&self, profile_id: &str, order_code: &str) -> ChannelResult<bool> {
        let mut profiles = self.profiles.write().await;
        let Some(slot) = profiles.get_mut(profile_id) else {
            return Ok(false);
        };
        let cleared = match &slot.payment_data {
            Some(data) if data.order_code == order_code => {
                slot.payment_data = None;
                true
            }
            _ => false,
        };
        if slot.is_empty() {
            profiles.remove(profile_id);
        }
        Ok(cleared)
    }

    async fn publish(&self, profile_id: &str, message: ChannelMessage) -> ChannelResult<()> {
        let mut profiles = self.profiles.write().await;
        profiles.entry(profile_id.to_string()).or_default().inbox.push(message);
        Ok(())
    }

    async fn drain(&self, profile_id: &str) -> ChannelResult<Vec<ChannelMessage>> {
        let mut profiles = self.profiles.write().await;
        let Some(slot) = profiles.get_mut(profile_id) else {
            return Ok(Vec::new());
        };
        let messages = std::mem::take(&mut slot.inbox);
        if slot.is_empty() {
            profiles.remove(profile_id);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn data(order_code: &str) -> PaymentData {
        PaymentData {
            order_code: order_code.to_string(),
            payment_method: "DANA".to_string(),
            grand_total: dec!(101000),
            created_at: None,
            expired_at: None,
        }
    }

    #[tokio::test]
    async fn clear_only_removes_matching_order() {
        let channel = InMemoryChannel::new();
        channel.write_payment_data("p1", &data("ORD-2")).await.unwrap();

        assert!(!channel.clear_payment_data("p1", "ORD-1").await.unwrap());
        assert_eq!(
            channel.read_payment_data("p1").await.unwrap().map(|d| d.order_code),
            Some("ORD-2".to_string())
        );

        assert!(channel.clear_payment_data("p1", "ORD-2").await.unwrap());
        assert!(channel.read_payment_data("p1").await.unwrap().is_none());
        assert_eq!(channel.profile_count().await, 0);
    }

    #[tokio::test]
    async fn drain_empties_the_inbox_in_order() {
        let channel = InMemoryChannel::new();
        let first = ChannelMessage::advisory(Some("ORD-1".to_string()), ProviderFamily::Dana, CallbackResult::Completed);
        let second = ChannelMessage::advisory(None, ProviderFamily::Qris, CallbackResult::Dismissed);
        channel.publish("p1", first.clone()).await.unwrap();
        channel.publish("p1", second.clone()).await.unwrap();

        assert_eq!(channel.drain("p1").await.unwrap(), vec![first, second]);
        assert!(channel.drain("p1").await.unwrap().is_empty());
        assert!(channel.drain("other").await.unwrap().is_empty());
        assert_eq!(channel.profile_count().await, 0);
    }

    #[tokio::test]
    async fn drain_keeps_a_profile_that_still_holds_a_record() {
        let channel = InMemoryChannel::new();
        channel.write_payment_data("p1", &data("ORD-5")).await.unwrap();
        channel
            .publish("p1", ChannelMessage::advisory(None, ProviderFamily::Dana, CallbackResult::Completed))
            .await
            .unwrap();

        assert_eq!(channel.drain("p1").await.unwrap().len(), 1);
        assert_eq!(channel.profile_count().await, 1);
        assert!(channel.read_payment_data("p1").await.unwrap().is_some());
    }

    #[test]
    fn messages_are_tagged_advisory_on_the_wire() {
        let message = ChannelMessage::advisory(None, ProviderFamily::ShopeePay, CallbackResult::Completed);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["provenance"], "advisory");
        assert_eq!(json["family"], "shopeepay");
    }

    #[test]
    fn payment_data_omits_absent_timestamps() {
        let json = serde_json::to_value(data("ORD-1")).unwrap();
        assert!(json.get("created_at").is_none());
        assert_eq!(json["order_code"], "ORD-1");
    }
}
