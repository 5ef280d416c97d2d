//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod channel {
    use super::*;
    use crate::reconciler::channel::PAYMENT_DATA_KEY;

    pub const NAMESPACE: &str = "channel";

    /// Payment record the secondary context reads to find its order.
    #[derive(Debug, Clone)]
    pub struct PaymentDataKey {
        pub profile_id: String,
    }

    impl PaymentDataKey {
        pub fn new(profile_id: impl Into<String>) -> Self {
            Self {
                profile_id: profile_id.into(),
            }
        }
    }

    impl fmt::Display for PaymentDataKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}",
                VERSION, NAMESPACE, self.profile_id, PAYMENT_DATA_KEY
            )
        }
    }

    /// List of advisory messages published by the secondary context.
    #[derive(Debug, Clone)]
    pub struct InboxKey {
        pub profile_id: String,
    }

    impl InboxKey {
        pub fn new(profile_id: impl Into<String>) -> Self {
            Self {
                profile_id: profile_id.into(),
            }
        }
    }

    impl fmt::Display for InboxKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}:inbox", VERSION, NAMESPACE, self.profile_id)
        }
    }
}
