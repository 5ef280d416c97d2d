//! Order payment state machine
//!
//! `apply` is a pure transition function: it never performs I/O, it only
//! returns the next order snapshot plus the side effects the caller must run.
//! Every report is checked against the rank lattice of [`PaymentStatus`], so
//! duplicated, late or reordered reports from any context converge on the same
//! terminal state without locks or coordination.

use crate::orders::error::TransitionError;
use crate::orders::model::{Order, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Where a status report came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Response of the external order service.
    Authoritative,
    /// Hint relayed from another browser context; never a source of truth.
    Advisory,
}

/// A candidate payment status report for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub order_code: String,
    /// Raw status as reported; parsed (and possibly rejected) by `apply`.
    pub reported: String,
    pub provenance: Provenance,
    pub observed_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn authoritative(order_code: impl Into<String>, reported: impl Into<String>) -> Self {
        Self {
            order_code: order_code.into(),
            reported: reported.into(),
            provenance: Provenance::Authoritative,
            observed_at: Utc::now(),
        }
    }

    pub fn advisory(order_code: impl Into<String>, reported: impl Into<String>) -> Self {
        Self {
            order_code: order_code.into(),
            reported: reported.into(),
            provenance: Provenance::Advisory,
            observed_at: Utc::now(),
        }
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Apply the order's voucher/points redemption. Emitted once, on entry to `paid`.
    Redeem { order_code: String },
    /// Destroy the payment session and its advisory channel record.
    TeardownSession { order_code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// The report was at or behind the current rank, or the current status is absorbing.
    Ignored {
        current: PaymentStatus,
        reported: PaymentStatus,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub order: Order,
    pub transition: Transition,
    pub effects: Vec<Effect>,
}

/// Whether `next` may replace `current`.
fn accepts(current: PaymentStatus, next: PaymentStatus) -> bool {
    if current.is_absorbing() {
        return false;
    }
    if next == PaymentStatus::Refunded {
        return current == PaymentStatus::Paid;
    }
    next.rank() > current.rank()
}

/// Computes the order that results from `event`, plus the effects to run.
pub fn apply(order: &Order, event: &StatusEvent) -> Result<Outcome, TransitionError> {
    if event.order_code != order.code {
        return Err(TransitionError::NotFound {
            order_code: event.order_code.clone(),
        });
    }

    let reported = event.reported.parse::<PaymentStatus>().map_err(|e| {
        warn!(
            order_code = %event.order_code,
            reported = %event.reported,
            provenance = ?event.provenance,
            "dropping status report with malformed value"
        );
        TransitionError::InvalidTransition {
            order_code: event.order_code.clone(),
            reason: e.to_string(),
        }
    })?;

    let current = order.payment_status;
    if !accepts(current, reported) {
        debug!(
            order_code = %order.code,
            current = %current,
            reported = %reported,
            provenance = ?event.provenance,
            "ignoring stale or duplicate status report"
        );
        return Ok(Outcome {
            order: order.clone(),
            transition: Transition::Ignored { current, reported },
            effects: Vec::new(),
        });
    }

    let mut next = order.clone();
    next.payment_status = reported;
    let mut effects = Vec::new();

    match reported {
        PaymentStatus::Paid => {
            next.paid_at = Some(event.observed_at);
            next.expired_at = None;
            effects.push(Effect::Redeem {
                order_code: order.code.clone(),
            });
        }
        PaymentStatus::Expired => {
            next.expired_at = Some(event.observed_at);
            next.paid_at = None;
        }
        PaymentStatus::Unpaid | PaymentStatus::Pending | PaymentStatus::Refunded => {}
    }
    if reported.is_terminal() {
        effects.push(Effect::TeardownSession {
            order_code: order.code.clone(),
        });
    }

    info!(
        order_code = %order.code,
        from = %current,
        to = %reported,
        provenance = ?event.provenance,
        "payment status advanced"
    );

    Ok(Outcome {
        order: next,
        transition: Transition::Applied {
            from: current,
            to: reported,
        },
        effects,
    })
}

// ============================================================================
// Order arena
// ============================================================================

/// Orders owned by the primary context for the lifetime of their payment flow.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: HashMap<String, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, order_code: &str) -> Option<&Order> {
        self.orders.get(order_code)
    }

    /// Forgets an order whose payment flow is over.
    pub fn remove(&mut self, order_code: &str) -> Option<Order> {
        self.orders.remove(order_code)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Inserts a fresh snapshot, or folds it into the held copy.
    ///
    /// A refetched snapshot never moves the payment status backwards: its
    /// status is applied as an authoritative report against the held order,
    /// while totals and delivery status are refreshed.
    pub fn upsert(&mut self, snapshot: Order) -> Result<Outcome, TransitionError> {
        let Some(held) = self.orders.get(&snapshot.code) else {
            let outcome = Outcome {
                order: snapshot.clone(),
                transition: Transition::Ignored {
                    current: snapshot.payment_status,
                    reported: snapshot.payment_status,
                },
                effects: Vec::new(),
            };
            self.orders.insert(snapshot.code.clone(), snapshot);
            return Ok(outcome);
        };

        let event = StatusEvent::authoritative(&snapshot.code, snapshot.payment_status.as_str());
        let mut outcome = apply(held, &event)?;
        outcome.order.totals = snapshot.totals;
        outcome.order.advance_delivery(snapshot.status);
        self.orders
            .insert(outcome.order.code.clone(), outcome.order.clone());
        Ok(outcome)
    }

    /// Resolves the event's order and applies it.
    pub fn apply_event(&mut self, event: &StatusEvent) -> Result<Outcome, TransitionError> {
        let order = self
            .orders
            .get(&event.order_code)
            .ok_or_else(|| TransitionError::NotFound {
                order_code: event.order_code.clone(),
            })?;
        let outcome = apply(order, event)?;
        if outcome.transition.is_applied() {
            self.orders
                .insert(outcome.order.code.clone(), outcome.order.clone());
        }
        Ok(outcome)
    }
}
