use crate::ledger::{RedemptionLedger, RedemptionOutcome};
use crate::logging::mask_phone;
use crate::orders::error::TransitionError;
use crate::orders::model::{Order, PaymentStatus};
use crate::orders::state_machine::{Effect, OrderBook, Outcome, StatusEvent};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{CheckStatusRequest, PaymentMethod, ProcessPaymentRequest};
use crate::reconciler::channel::{AdvisoryChannel, ChannelMessage, PaymentData};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::session::{PaymentDisplay, PaymentSession, SessionRegistry, VoucherClaim};
use crate::workers::payment_poller::{PaymentPoller, PollOutcome};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub order_code: String,
    /// Browser profile shared by the checkout tab and the provider tab.
    pub profile_id: String,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub shipping_recipient_name: String,
    pub shipping_recipient_phone: String,
    #[serde(default)]
    pub voucher: Option<VoucherClaim>,
}

impl CheckoutRequest {
    pub fn validate(&self) -> ReconcileResult<()> {
        let required = [
            ("order_code", &self.order_code),
            ("profile_id", &self.profile_id),
            ("payment_method.code", &self.payment_method.code),
            ("shipping_address", &self.shipping_address),
            ("shipping_recipient_name", &self.shipping_recipient_name),
            ("shipping_recipient_phone", &self.shipping_recipient_phone),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ReconcileError::invalid(field, "must not be empty"));
            }
        }
        if let Some(claim) = &self.voucher {
            if claim.points < 0 {
                return Err(ReconcileError::invalid("voucher.points", "must not be negative"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckoutTicket {
    pub order_code: String,
    pub session_token: Uuid,
    pub payment_status: PaymentStatus,
    pub grand_total: Decimal,
    /// Provider page to open in a second tab, for e-wallet and QR methods.
    pub redirect_url: Option<String>,
    pub display: PaymentDisplay,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Settled,
    /// Polling ran out of time; the order is left untouched and may still settle.
    StillProcessing,
    Cancelled,
    /// A newer checkout for the same order took over.
    Superseded,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Settlement {
    pub order_code: String,
    pub payment_status: PaymentStatus,
    pub state: SettlementState,
    pub redemption: RedemptionOutcome,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// An order nobody has touched for this long is forgotten by default.
pub const DEFAULT_ORDER_RETENTION: Duration = Duration::from_secs(15 * 60);

/// Redemption result of one order. Reserved as `None` in the same critical
/// section that enters `paid`, filled once the ledger has answered.
type RedemptionSlot = watch::Sender<Option<RedemptionOutcome>>;

#[derive(Default)]
struct OrderState {
    book: OrderBook,
    redemptions: HashMap<String, RedemptionSlot>,
}

/// Per-service reconciliation context, cheap to clone.
///
/// Every status change, whatever triggered it, goes through
/// [`OrderBook::apply_event`] under one lock, so concurrent pollers and
/// advisory checks cannot both win the same transition.
#[derive(Clone)]
pub struct Reconciler {
    gateway: Arc<dyn PaymentGateway>,
    channel: Arc<dyn AdvisoryChannel>,
    ledger: Arc<RedemptionLedger>,
    poller: Arc<PaymentPoller>,
    sessions: SessionRegistry,
    orders: Arc<Mutex<OrderState>>,
    /// Last checkout, status check, advisory or effect per held order.
    activity: Arc<Mutex<HashMap<String, Instant>>>,
    retention: Duration,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        channel: Arc<dyn AdvisoryChannel>,
        ledger: Arc<RedemptionLedger>,
        poller: Arc<PaymentPoller>,
    ) -> Self {
        Self {
            gateway,
            channel,
            ledger,
            poller,
            sessions: SessionRegistry::new(),
            orders: Arc::new(Mutex::new(OrderState::default())),
            activity: Arc::new(Mutex::new(HashMap::new())),
            retention: DEFAULT_ORDER_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Number of orders currently held.
    pub async fn tracked_orders(&self) -> usize {
        self.orders.lock().await.book.len()
    }

    /// Forgets orders idle for the retention period: the order, its
    /// redemption slot, and any session left behind with its payment record.
    /// Returns how many orders were dropped.
    pub async fn evict_idle(&self) -> usize {
        let mut abandoned = Vec::new();
        let evicted = {
            let mut activity = self.activity.lock().await;
            let idle: Vec<String> = activity
                .iter()
                .filter(|(_, last)| last.elapsed() >= self.retention)
                .map(|(code, _)| code.clone())
                .collect();

            for code in &idle {
                activity.remove(code);
                if let Some(session) = self.sessions.close(code).await {
                    abandoned.push(session);
                }
                let mut state = self.orders.lock().await;
                state.book.remove(code);
                state.redemptions.remove(code);
            }
            idle.len()
        };

        for session in &abandoned {
            self.clear_channel(session).await;
        }
        if evicted > 0 {
            debug!(evicted, abandoned_sessions = abandoned.len(), "idle orders evicted");
        }
        evicted
    }

    /// Sweeps idle orders every `period` until shutdown.
    pub async fn run_eviction(self, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        info!(period_secs = period.as_secs(), retention_secs = self.retention.as_secs(), "order eviction started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.evict_idle().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("order eviction stopped");
                        break;
                    }
                }
            }
        }
    }

    pub async fn session(&self, order_code: &str) -> Option<PaymentSession> {
        self.sessions.get(order_code).await
    }

    pub async fn order(&self, order_code: &str) -> Option<Order> {
        self.orders.lock().await.book.get(order_code).cloned()
    }

    /// Starts (or restarts) payment of an order.
    ///
    /// A previous session for the same order is superseded. Orders already in
    /// a terminal payment status are refused.
    pub async fn begin_checkout(&self, request: CheckoutRequest) -> ReconcileResult<CheckoutTicket> {
        request.validate()?;
        self.touch(&request.order_code).await;

        let snapshot = self.gateway.get_order(&request.order_code).await?;
        let order = self.transition(|book| book.upsert(snapshot)).await?;

        if order.payment_status.is_terminal() {
            return Err(ReconcileError::AlreadySettled {
                order_code: order.code,
                status: order.payment_status,
            });
        }

        info!(
            order_code = %request.order_code,
            payment_method = %request.payment_method.code,
            category = %request.payment_method.category,
            recipient_phone = %mask_phone(&request.shipping_recipient_phone),
            "processing payment"
        );

        let response = self
            .gateway
            .process_payment(ProcessPaymentRequest {
                order_code: request.order_code.clone(),
                payment_method_code: request.payment_method.code.clone(),
                shipping_address: request.shipping_address.clone(),
                shipping_recipient_name: request.shipping_recipient_name.clone(),
                shipping_recipient_phone: request.shipping_recipient_phone.clone(),
            })
            .await?;

        let mut session = PaymentSession::new(
            &request.order_code,
            &request.profile_id,
            request.payment_method.clone(),
            request.voucher,
        );
        session.display = PaymentDisplay::from(&response);
        session.last_known_status = order.payment_status;
        let token = session.session_token;
        let redirect_url = session.redirect_target().map(str::to_string);
        let display = session.display.clone();

        if let Some(previous) = self.sessions.open(session).await {
            info!(
                order_code = %request.order_code,
                previous_token = %previous.session_token,
                session_token = %token,
                "payment session superseded"
            );
            self.clear_channel(&previous).await;
        }

        let event = StatusEvent::authoritative(&request.order_code, &response.payment_status);
        let order = self.apply_authoritative(&event).await?;

        if let Some(url) = redirect_url.as_deref() {
            if !order.payment_status.is_terminal() {
                let data = PaymentData {
                    order_code: order.code.clone(),
                    payment_method: response.payment_method.clone(),
                    grand_total: response.grand_total,
                    created_at: Some(Utc::now()),
                    expired_at: response.expired_at,
                };
                // The poller does not depend on this record.
                if let Err(e) = self.channel.write_payment_data(&request.profile_id, &data).await {
                    warn!(
                        order_code = %order.code,
                        error = %e,
                        "failed to write payment record for secondary context"
                    );
                }
                debug!(order_code = %order.code, redirect_url = %url, "redirect prepared");
            }
        }

        Ok(CheckoutTicket {
            order_code: order.code,
            session_token: token,
            payment_status: order.payment_status,
            grand_total: response.grand_total,
            redirect_url,
            display,
        })
    }

    /// Polls the order service until the order settles, the run times out, or
    /// `cancel` fires.
    pub async fn await_settlement(
        &self,
        order_code: &str,
        cancel: watch::Receiver<bool>,
    ) -> ReconcileResult<Settlement> {
        let current = self
            .order(order_code)
            .await
            .ok_or_else(|| TransitionError::NotFound {
                order_code: order_code.to_string(),
            })?;
        if current.payment_status.is_terminal() {
            return Ok(self.settlement(current, SettlementState::Settled).await);
        }

        let session = self
            .sessions
            .get(order_code)
            .await
            .ok_or_else(|| ReconcileError::SessionNotFound {
                order_code: order_code.to_string(),
            })?;
        let token = session.session_token;

        let this = self.clone();
        let code = order_code.to_string();
        let outcome = self
            .poller
            .run_until_settled(order_code, cancel, move |snapshot| {
                let this = this.clone();
                let code = code.clone();
                async move {
                    this.touch(&code).await;
                    if !this.sessions.is_current(&code, token).await {
                        info!(order_code = %code, session_token = %token, "stopping poll for stale session");
                        return ControlFlow::Break(());
                    }
                    match this.apply_authoritative(&snapshot.to_event()).await {
                        Ok(_) => ControlFlow::Continue(()),
                        Err(e) => {
                            warn!(order_code = %code, error = %e, "snapshot could not be applied");
                            ControlFlow::Break(())
                        }
                    }
                }
            })
            .await;
        self.touch(order_code).await;

        let order = self
            .order(order_code)
            .await
            .ok_or_else(|| TransitionError::NotFound {
                order_code: order_code.to_string(),
            })?;
        let state = if order.payment_status.is_terminal() {
            SettlementState::Settled
        } else {
            match outcome {
                PollOutcome::Settled(_) | PollOutcome::TimedOut => SettlementState::StillProcessing,
                PollOutcome::Cancelled => SettlementState::Cancelled,
                PollOutcome::Stopped => SettlementState::Superseded,
            }
        };

        info!(
            order_code = %order_code,
            payment_status = %order.payment_status,
            state = ?state,
            "settlement wait finished"
        );
        Ok(self.settlement(order, state).await)
    }

    /// Handles a hint from the secondary context.
    ///
    /// The hint itself never changes payment status. It only triggers one
    /// authoritative status check, whose answer goes through the state machine.
    pub async fn ingest_advisory(
        &self,
        profile_id: &str,
        message: &ChannelMessage,
    ) -> ReconcileResult<Option<Order>> {
        let order_code = match &message.order_code {
            Some(code) => Some(code.clone()),
            None => self
                .channel
                .read_payment_data(profile_id)
                .await?
                .map(|data| data.order_code),
        };
        let Some(order_code) = order_code else {
            debug!(profile_id = %profile_id, family = %message.family, "advisory without order code");
            return Ok(None);
        };
        if self.order(&order_code).await.is_none() {
            debug!(order_code = %order_code, "advisory for an order not tracked here");
            return Ok(None);
        }
        self.touch(&order_code).await;

        info!(
            order_code = %order_code,
            family = %message.family,
            result = ?message.result,
            provenance = ?message.provenance,
            "advisory signal received, checking status"
        );
        let response = self
            .gateway
            .check_status(CheckStatusRequest {
                order_code: order_code.clone(),
            })
            .await?;
        let event = StatusEvent::authoritative(&order_code, &response.payment_status);
        self.apply_authoritative(&event).await.map(Some)
    }

    /// Ingests every pending advisory message of a profile. Returns how many
    /// were handled without error.
    pub async fn drain_advisory(&self, profile_id: &str) -> ReconcileResult<usize> {
        let messages = self.channel.drain(profile_id).await?;
        let mut handled = 0;
        for message in &messages {
            match self.ingest_advisory(profile_id, message).await {
                Ok(_) => handled += 1,
                Err(e) => warn!(profile_id = %profile_id, error = %e, "advisory message dropped"),
            }
        }
        Ok(handled)
    }

    /// Drops the session and its payment record; payment status is untouched.
    pub async fn cancel_session(&self, order_code: &str) -> ReconcileResult<PaymentSession> {
        let session = self
            .sessions
            .close(order_code)
            .await
            .ok_or_else(|| ReconcileError::SessionNotFound {
                order_code: order_code.to_string(),
            })?;
        self.clear_channel(&session).await;
        self.touch(order_code).await;
        info!(order_code = %order_code, session_token = %session.session_token, "payment session cancelled");
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Runs `step` on the order book and hands its effects to a spawned task
    /// before the lock is released. A `Redeem` effect reserves the order's
    /// redemption slot in that same critical section, so a concurrent
    /// settlement waits for the ledger instead of reporting nothing, and a
    /// caller that is dropped mid-way cannot strand the slot.
    async fn transition<F>(&self, step: F) -> Result<Order, TransitionError>
    where
        F: FnOnce(&mut OrderBook) -> Result<Outcome, TransitionError>,
    {
        let (order, task) = {
            let mut state = self.orders.lock().await;
            let outcome = step(&mut state.book)?;
            if outcome
                .effects
                .iter()
                .any(|effect| matches!(effect, Effect::Redeem { .. }))
            {
                state
                    .redemptions
                    .insert(outcome.order.code.clone(), watch::channel(None).0);
            }
            let order = outcome.order.clone();
            let task = (outcome.transition.is_applied() || !outcome.effects.is_empty())
                .then(|| tokio::spawn(self.clone().execute_effects(outcome)));
            (order, task)
        };

        let Some(task) = task else {
            return Ok(order);
        };
        if let Err(e) = task.await {
            error!(order_code = %order.code, error = %e, "payment effects aborted");
            // Waiters fall back to the ledger once the slot is gone
            let mut state = self.orders.lock().await;
            if state
                .redemptions
                .get(&order.code)
                .is_some_and(|slot| slot.borrow().is_none())
            {
                state.redemptions.remove(&order.code);
            }
        }
        Ok(order)
    }

    async fn apply_authoritative(&self, event: &StatusEvent) -> ReconcileResult<Order> {
        match self.transition(|book| book.apply_event(event)).await {
            Ok(order) => Ok(order),
            // Malformed status: already logged by the state machine.
            Err(TransitionError::InvalidTransition { order_code, .. }) => self
                .order(&order_code)
                .await
                .ok_or(ReconcileError::Transition(TransitionError::NotFound { order_code })),
            Err(e) => Err(e.into()),
        }
    }

    async fn execute_effects(self, outcome: Outcome) {
        if outcome.transition.is_applied() {
            self.sessions
                .record_status(&outcome.order.code, outcome.order.payment_status)
                .await;
        }
        for effect in &outcome.effects {
            match effect {
                Effect::Redeem { order_code } => {
                    let result = self.redeem(order_code, &outcome.order).await;
                    self.orders
                        .lock()
                        .await
                        .redemptions
                        .entry(order_code.clone())
                        .or_insert_with(|| watch::channel(None).0)
                        .send_replace(Some(result));
                }
                Effect::TeardownSession { order_code } => {
                    if let Some(session) = self.sessions.close(order_code).await {
                        self.clear_channel(&session).await;
                        debug!(order_code = %order_code, "payment session torn down");
                    }
                    self.touch(order_code).await;
                }
            }
        }
    }

    async fn touch(&self, order_code: &str) {
        self.activity
            .lock()
            .await
            .insert(order_code.to_string(), Instant::now());
    }

    /// Ledger failures are reported, never propagated: the payment stays paid.
    async fn redeem(&self, order_code: &str, order: &Order) -> RedemptionOutcome {
        let claim = self.sessions.get(order_code).await.and_then(|s| s.voucher);
        let Some(claim) = claim else {
            return RedemptionOutcome::NotRequested;
        };
        match self.ledger.redeem(order, claim.voucher_id, claim.points).await {
            Ok(receipt) => receipt.into(),
            Err(e) => {
                warn!(
                    order_code = %order_code,
                    voucher_id = claim.voucher_id,
                    code = e.code(),
                    error = %e,
                    "redemption rejected, payment stays confirmed"
                );
                RedemptionOutcome::from(&e)
            }
        }
    }

    async fn clear_channel(&self, session: &PaymentSession) {
        if let Err(e) = self
            .channel
            .clear_payment_data(&session.profile_id, &session.order_code)
            .await
        {
            warn!(order_code = %session.order_code, error = %e, "failed to clear payment record");
        }
    }

    async fn settlement(&self, order: Order, state: SettlementState) -> Settlement {
        let pending = self
            .orders
            .lock()
            .await
            .redemptions
            .get(&order.code)
            .map(|slot| slot.subscribe());
        let recorded = match pending {
            Some(mut rx) => rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|outcome| (*outcome).clone()),
            None => None,
        };
        let redemption = match recorded {
            Some(outcome) => outcome,
            None if order.payment_status == PaymentStatus::Paid => {
                match self.ledger.existing(&order.code).await {
                    Ok(Some(entry)) => RedemptionOutcome::AlreadyApplied(entry),
                    Ok(None) => RedemptionOutcome::NotRequested,
                    Err(e) => RedemptionOutcome::from(&e),
                }
            }
            None => RedemptionOutcome::NotRequested,
        };
        Settlement {
            order_code: order.code,
            payment_status: order.payment_status,
            state,
            redemption,
        }
    }
}
