use crate::orders::model::PaymentStatus;
use crate::orders::state_machine::StatusEvent;
use crate::orders::UnknownStatus;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::CheckStatusRequest;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// Conditions surfaced by the poller to its caller.
///
/// Individual request failures never appear here: they are logged and retried
/// on the next tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// No terminal status was observed before `max_duration` elapsed.
    #[error("payment for order {order_code} still processing after {elapsed_secs}s")]
    Timeout { order_code: String, elapsed_secs: u64 },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed delay between two status checks.
    pub interval: Duration,
    /// Upper bound on one polling run, measured from its first tick.
    pub max_duration: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_duration: Duration::from_secs(900),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One answer of the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub order_code: String,
    pub payment_status: String,
    pub transaction_status: Option<String>,
    pub observed_at: DateTime<Utc>,
    /// 1-based index of the status check that produced this snapshot.
    pub tick: u32,
}

impl StatusSnapshot {
    pub fn status(&self) -> Result<PaymentStatus, UnknownStatus> {
        self.payment_status.parse()
    }

    pub fn terminal_status(&self) -> Option<PaymentStatus> {
        self.status().ok().filter(|s| s.is_terminal())
    }

    pub fn to_event(&self) -> StatusEvent {
        StatusEvent::authoritative(&self.order_code, &self.payment_status).at(self.observed_at)
    }
}

pub type PollItem = Result<StatusSnapshot, PollError>;

/// How a driven polling run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A terminal snapshot was observed.
    Settled(PaymentStatus),
    /// `max_duration` elapsed first. Recoverable; the order is left as is.
    TimedOut,
    /// The waiting view went away.
    Cancelled,
    /// The snapshot handler asked to stop.
    Stopped,
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

struct PollState {
    gateway: Arc<dyn PaymentGateway>,
    order_code: String,
    interval: Duration,
    max_duration: Duration,
    started: Instant,
    attempts: u32,
    finished: bool,
}

pub struct PaymentPoller {
    gateway: Arc<dyn PaymentGateway>,
    config: PollerConfig,
}

impl PaymentPoller {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: PollerConfig) -> Self {
        Self { gateway, config }
    }

    /// Lazy, finite sequence of status snapshots for one order.
    ///
    /// The first check fires immediately, then one per `interval`. The stream
    /// ends right after a terminal snapshot, or after yielding a single
    /// [`PollError::Timeout`] once `max_duration` has elapsed. Each call starts
    /// a fresh run.
    pub fn poll(
        &self,
        order_code: &str,
        interval: Duration,
        max_duration: Duration,
    ) -> BoxStream<'static, PollItem> {
        let state = PollState {
            gateway: self.gateway.clone(),
            order_code: order_code.to_string(),
            interval,
            max_duration,
            started: Instant::now(),
            attempts: 0,
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }

            loop {
                if state.attempts > 0 {
                    tokio::time::sleep(state.interval).await;
                }

                let elapsed = state.started.elapsed();
                if elapsed >= state.max_duration {
                    state.finished = true;
                    let err = PollError::Timeout {
                        order_code: state.order_code.clone(),
                        elapsed_secs: elapsed.as_secs(),
                    };
                    warn!(error = %err, attempts = state.attempts, "payment polling timed out");
                    return Some((Err(err), state));
                }

                state.attempts += 1;
                let request = CheckStatusRequest {
                    order_code: state.order_code.clone(),
                };
                match state.gateway.check_status(request).await {
                    Ok(response) => {
                        let snapshot = StatusSnapshot {
                            order_code: state.order_code.clone(),
                            payment_status: response.payment_status,
                            transaction_status: response.transaction_status,
                            observed_at: Utc::now(),
                            tick: state.attempts,
                        };
                        debug!(
                            order_code = %snapshot.order_code,
                            tick = snapshot.tick,
                            payment_status = %snapshot.payment_status,
                            "payment status observed"
                        );
                        if snapshot.terminal_status().is_some() {
                            state.finished = true;
                        }
                        return Some((Ok(snapshot), state));
                    }
                    Err(e) => {
                        // Swallowed: the next tick is the retry.
                        warn!(
                            order_code = %state.order_code,
                            attempt = state.attempts,
                            retryable = e.is_retryable(),
                            error = %e,
                            "payment status check failed"
                        );
                    }
                }
            }
        })
        .boxed()
    }

    /// Drives a run with the configured interval and duration, handing every
    /// snapshot to `on_snapshot` until the run settles, times out, or is
    /// cancelled.
    ///
    /// Cancellation is signalled by `true` on `cancel` or by its sender being
    /// dropped. No further ticks fire after it and no state is fabricated.
    pub async fn run_until_settled<F, Fut>(
        &self,
        order_code: &str,
        mut cancel: watch::Receiver<bool>,
        mut on_snapshot: F,
    ) -> PollOutcome
    where
        F: FnMut(StatusSnapshot) -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        if *cancel.borrow() {
            return PollOutcome::Cancelled;
        }

        let mut stream = self.poll(order_code, self.config.interval, self.config.max_duration);
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!(order_code = %order_code, "payment polling cancelled");
                        return PollOutcome::Cancelled;
                    }
                }
                item = stream.next() => match item {
                    Some(Ok(snapshot)) => {
                        let terminal = snapshot.terminal_status();
                        if on_snapshot(snapshot).await.is_break() {
                            return PollOutcome::Stopped;
                        }
                        if let Some(status) = terminal {
                            return PollOutcome::Settled(status);
                        }
                    }
                    Some(Err(PollError::Timeout { .. })) => return PollOutcome::TimedOut,
                    None => return PollOutcome::Stopped,
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
