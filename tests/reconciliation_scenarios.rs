//! End-to-end reconciliation flows against a scripted order service
//!
//! Tests cover:
//! - Polling to paid with a single redemption
//! - Expiry and stale reports after it
//! - Rejected redemptions that leave the payment confirmed
//! - Advisory signals from the provider tab
//! - Cancellation, timeouts and superseded sessions
//! - Forgetting idle orders
//! - The provider tab handoff

mod common;

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use checkout_reconciler::ledger::RedemptionOutcome;
use checkout_reconciler::orders::model::PaymentStatus;
use checkout_reconciler::reconciler::{
    plan_handoff, AdvisoryChannel, CallbackParams, CallbackResult, ChannelMessage, HandoffConfig,
    HandoffError, HandoffReport, ProviderFamily, ReconcileError, SecondaryContext,
    SettlementState, VoucherClaim, WindowHost,
};

use common::{checkout, harness, harness_with, ScriptedGateway, Step, PROFILE};

#[tokio::test(start_paused = true)]
async fn test_pending_pending_paid_settles_and_redeems_once() {
    let gateway = ScriptedGateway::new()
        .with_order(
            "ORD-1",
            "pending",
            &[Step::Status("pending"), Step::Status("pending"), Step::Status("paid")],
        )
        .with_voucher(7, 500)
        .with_balance(1_000);
    let h = harness(gateway);

    let claim = VoucherClaim {
        voucher_id: 7,
        points: 100,
    };
    let ticket = h
        .reconciler
        .begin_checkout(checkout("ORD-1", Some(claim)))
        .await
        .unwrap();
    assert_eq!(ticket.payment_status, PaymentStatus::Pending);
    assert_eq!(ticket.redirect_url.as_deref(), Some("dana://pay?order=ORD-1"));

    let record = h.channel.read_payment_data(PROFILE).await.unwrap().unwrap();
    assert_eq!(record.order_code, "ORD-1");

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = h.reconciler.await_settlement("ORD-1", cancel_rx).await.unwrap();

    assert_eq!(settlement.state, SettlementState::Settled);
    assert_eq!(settlement.payment_status, PaymentStatus::Paid);
    match &settlement.redemption {
        RedemptionOutcome::Applied(entry) => {
            assert_eq!(entry.voucher_id, 7);
            assert_eq!(entry.points_debited, 500);
        }
        other => panic!("expected applied redemption, got {:?}", other),
    }
    assert_eq!(h.gateway.check_calls("ORD-1"), 3);
    assert_eq!(h.store.len().await, 1);
    assert!(h.reconciler.session("ORD-1").await.is_none());
    assert!(h.channel.read_payment_data(PROFILE).await.unwrap().is_none());

    // Waiting again neither polls nor redeems a second time
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let again = h.reconciler.await_settlement("ORD-1", cancel_rx).await.unwrap();
    assert_eq!(again.state, SettlementState::Settled);
    assert_eq!(h.gateway.check_calls("ORD-1"), 3);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_order_rejects_stray_pending() {
    let gateway = ScriptedGateway::new().with_order(
        "ORD-2",
        "pending",
        &[Step::Status("pending"), Step::Status("expired")],
    );
    let h = harness(gateway);

    h.reconciler
        .begin_checkout(checkout("ORD-2", None))
        .await
        .unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = h.reconciler.await_settlement("ORD-2", cancel_rx).await.unwrap();
    assert_eq!(settlement.payment_status, PaymentStatus::Expired);
    assert_eq!(settlement.redemption, RedemptionOutcome::NotRequested);

    // A late provider callback prompts a check that reports a stale status
    h.gateway.then("ORD-2", &[Step::Status("pending")]);
    h.channel
        .publish(
            PROFILE,
            ChannelMessage::advisory(
                Some("ORD-2".to_string()),
                ProviderFamily::Qris,
                CallbackResult::Completed,
            ),
        )
        .await
        .unwrap();
    assert_eq!(h.reconciler.drain_advisory(PROFILE).await.unwrap(), 1);

    let order = h.reconciler.order("ORD-2").await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Expired);
    assert!(order.expired_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_points_keeps_payment_confirmed() {
    let gateway = ScriptedGateway::new()
        .with_order("ORD-3", "pending", &[Step::Status("paid")])
        .with_voucher(9, 500)
        .with_balance(400);
    let h = harness(gateway);

    let claim = VoucherClaim {
        voucher_id: 9,
        points: 600,
    };
    h.reconciler
        .begin_checkout(checkout("ORD-3", Some(claim)))
        .await
        .unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = h.reconciler.await_settlement("ORD-3", cancel_rx).await.unwrap();

    assert_eq!(settlement.payment_status, PaymentStatus::Paid);
    match &settlement.redemption {
        RedemptionOutcome::Rejected { code, .. } => assert_eq!(code, "INSUFFICIENT_POINTS"),
        other => panic!("expected rejected redemption, got {:?}", other),
    }
    assert_eq!(h.store.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_by_the_poller() {
    let gateway = ScriptedGateway::new().with_order(
        "ORD-4",
        "pending",
        &[Step::NetworkFailure, Step::NetworkFailure, Step::Status("paid")],
    );
    let h = harness(gateway);

    h.reconciler
        .begin_checkout(checkout("ORD-4", None))
        .await
        .unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = h.reconciler.await_settlement("ORD-4", cancel_rx).await.unwrap();

    assert_eq!(settlement.payment_status, PaymentStatus::Paid);
    assert_eq!(h.gateway.check_calls("ORD-4"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_advisory_triggers_one_authoritative_check() {
    let gateway = ScriptedGateway::new().with_order("ORD-5", "pending", &[Step::Status("paid")]);
    let h = harness(gateway);

    h.reconciler
        .begin_checkout(checkout("ORD-5", None))
        .await
        .unwrap();

    // No order code on the message: it is resolved from the payment record
    h.channel
        .publish(
            PROFILE,
            ChannelMessage::advisory(None, ProviderFamily::Dana, CallbackResult::Completed),
        )
        .await
        .unwrap();
    assert_eq!(h.reconciler.drain_advisory(PROFILE).await.unwrap(), 1);

    assert_eq!(h.gateway.check_calls("ORD-5"), 1);
    let order = h.reconciler.order("ORD-5").await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert!(h.reconciler.session("ORD-5").await.is_none());
    assert!(h.channel.drain(PROFILE).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_advisory_and_poll_converge_on_one_redemption() {
    let gateway = ScriptedGateway::new()
        .with_order("ORD-6", "pending", &[Step::Status("pending"), Step::Status("paid")])
        .with_voucher(3, 200)
        .with_balance(500);
    let h = harness(gateway);

    let claim = VoucherClaim {
        voucher_id: 3,
        points: 0,
    };
    h.reconciler
        .begin_checkout(checkout("ORD-6", Some(claim)))
        .await
        .unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let reconciler = h.reconciler.clone();
    let wait = tokio::spawn(async move { reconciler.await_settlement("ORD-6", cancel_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.channel
        .publish(
            PROFILE,
            ChannelMessage::advisory(
                Some("ORD-6".to_string()),
                ProviderFamily::Dana,
                CallbackResult::Completed,
            ),
        )
        .await
        .unwrap();
    h.reconciler.drain_advisory(PROFILE).await.unwrap();

    let settlement = wait.await.unwrap().unwrap();
    assert_eq!(settlement.state, SettlementState::Settled);
    assert_eq!(settlement.payment_status, PaymentStatus::Paid);
    assert!(matches!(settlement.redemption, RedemptionOutcome::Applied(_)));
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling_and_keeps_status() {
    let gateway = ScriptedGateway::new().with_order("ORD-7", "pending", &[Step::Status("pending")]);
    let h = harness(gateway);

    h.reconciler
        .begin_checkout(checkout("ORD-7", None))
        .await
        .unwrap();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let reconciler = h.reconciler.clone();
    let wait = tokio::spawn(async move { reconciler.await_settlement("ORD-7", cancel_rx).await });

    tokio::time::sleep(Duration::from_secs(7)).await;
    cancel_tx.send(true).unwrap();

    let settlement = wait.await.unwrap().unwrap();
    assert_eq!(settlement.state, SettlementState::Cancelled);
    assert_eq!(settlement.payment_status, PaymentStatus::Pending);
    assert_eq!(h.gateway.check_calls("ORD-7"), 3);

    // No tick fires after cancellation
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.gateway.check_calls("ORD-7"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_session_clears_record_but_not_status() {
    let gateway = ScriptedGateway::new().with_order("ORD-8", "pending", &[]);
    let h = harness(gateway);

    h.reconciler
        .begin_checkout(checkout("ORD-8", None))
        .await
        .unwrap();
    let session = h.reconciler.cancel_session("ORD-8").await.unwrap();
    assert_eq!(session.order_code, "ORD-8");

    assert!(h.channel.read_payment_data(PROFILE).await.unwrap().is_none());
    let order = h.reconciler.order("ORD-8").await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = h.reconciler.await_settlement("ORD-8", cancel_rx).await;
    assert!(matches!(result, Err(ReconcileError::SessionNotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_still_processing() {
    let gateway = ScriptedGateway::new().with_order("ORD-9", "pending", &[Step::Status("pending")]);
    let h = harness_with(gateway, Duration::from_secs(10));

    h.reconciler
        .begin_checkout(checkout("ORD-9", None))
        .await
        .unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = h.reconciler.await_settlement("ORD-9", cancel_rx).await.unwrap();

    assert_eq!(settlement.state, SettlementState::StillProcessing);
    assert_eq!(settlement.payment_status, PaymentStatus::Pending);
    assert_eq!(h.gateway.check_calls("ORD-9"), 4);
    // The order is not cancelled, so the customer can keep waiting
    assert!(h.reconciler.session("ORD-9").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_new_checkout_supersedes_running_wait() {
    let gateway = ScriptedGateway::new().with_order("ORD-10", "pending", &[Step::Status("pending")]);
    let h = harness(gateway);

    let first = h
        .reconciler
        .begin_checkout(checkout("ORD-10", None))
        .await
        .unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let reconciler = h.reconciler.clone();
    let wait = tokio::spawn(async move { reconciler.await_settlement("ORD-10", cancel_rx).await });

    tokio::time::sleep(Duration::from_secs(4)).await;
    let second = h
        .reconciler
        .begin_checkout(checkout("ORD-10", None))
        .await
        .unwrap();
    assert_ne!(first.session_token, second.session_token);

    let settlement = wait.await.unwrap().unwrap();
    assert_eq!(settlement.state, SettlementState::Superseded);
    assert_eq!(h.gateway.process_calls("ORD-10"), 2);
    let session = h.reconciler.session("ORD-10").await.unwrap();
    assert_eq!(session.session_token, second.session_token);
}

#[tokio::test]
async fn test_checkout_refuses_settled_order() {
    let gateway = ScriptedGateway::new().with_order("ORD-11", "paid", &[Step::Status("paid")]);
    let h = harness(gateway);

    let ticket = h
        .reconciler
        .begin_checkout(checkout("ORD-11", None))
        .await
        .unwrap();
    assert_eq!(ticket.payment_status, PaymentStatus::Paid);
    assert!(h.channel.read_payment_data(PROFILE).await.unwrap().is_none());

    let again = h.reconciler.begin_checkout(checkout("ORD-11", None)).await;
    assert!(matches!(
        again,
        Err(ReconcileError::AlreadySettled {
            status: PaymentStatus::Paid,
            ..
        })
    ));
}

struct StubbornWindow {
    log: Mutex<Vec<String>>,
}

#[async_trait]
impl WindowHost for StubbornWindow {
    async fn show_confirmation(&self, message: &str) {
        self.log.lock().unwrap().push(format!("show:{}", message));
    }

    async fn try_close(&self) -> bool {
        self.log.lock().unwrap().push("close".to_string());
        false
    }

    async fn navigate(&self, location: &str) -> Result<(), HandoffError> {
        self.log.lock().unwrap().push(format!("navigate:{}", location));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_provider_tab_navigates_back_when_close_is_refused() {
    let gateway = ScriptedGateway::new().with_order("ORD-12", "pending", &[]);
    let h = harness(gateway);
    h.reconciler
        .begin_checkout(checkout("ORD-12", None))
        .await
        .unwrap();

    let callback = CallbackParams {
        profile_id: PROFILE.to_string(),
        order_code: None,
        result: Some("success".to_string()),
    };
    let plan = plan_handoff(
        ProviderFamily::Dana,
        &callback,
        h.channel.as_ref(),
        &HandoffConfig::default(),
    )
    .await;
    assert_eq!(plan.order_code.as_deref(), Some("ORD-12"));

    let context = SecondaryContext::new(StubbornWindow {
        log: Mutex::new(Vec::new()),
    });
    let report = context.run(&plan).await;
    assert_eq!(
        report,
        HandoffReport::NavigatedBack {
            location: "/payment/waiting?order_code=ORD-12".to_string()
        }
    );

    let log = context.host().log.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("show:"));
    assert_eq!(log[1], "close");

    // The handoff never touches payment status
    drop(log);
    let order = h.reconciler.order("ORD-12").await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_settlement_waits_for_redemption_started_by_advisory() {
    let gateway = ScriptedGateway::new()
        .with_order("ORD-13", "pending", &[Step::Status("paid")])
        .with_voucher(7, 500)
        .with_balance(1_000)
        .with_voucher_delay(Duration::from_secs(5));
    let h = harness(gateway);

    let claim = VoucherClaim {
        voucher_id: 7,
        points: 0,
    };
    h.reconciler
        .begin_checkout(checkout("ORD-13", Some(claim)))
        .await
        .unwrap();

    let reconciler = h.reconciler.clone();
    let advisory = tokio::spawn(async move {
        let message = ChannelMessage::advisory(
            Some("ORD-13".to_string()),
            ProviderFamily::Dana,
            CallbackResult::Completed,
        );
        reconciler.ingest_advisory(PROFILE, &message).await
    });

    // Paid is recorded, the voucher lookup is still running
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = h.reconciler.await_settlement("ORD-13", cancel_rx).await.unwrap();

    assert_eq!(settlement.payment_status, PaymentStatus::Paid);
    match &settlement.redemption {
        RedemptionOutcome::Applied(entry) => assert_eq!(entry.voucher_id, 7),
        other => panic!("expected applied redemption, got {:?}", other),
    }
    advisory.await.unwrap().unwrap();
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_orders_are_forgotten_after_retention() {
    let gateway = ScriptedGateway::new()
        .with_order("ORD-14", "pending", &[Step::Status("paid")])
        .with_order("ORD-15", "pending", &[Step::Status("pending")])
        .with_voucher(7, 500)
        .with_balance(1_000);
    let h = harness(gateway);
    let reconciler = h.reconciler.clone().with_retention(Duration::from_secs(120));

    let claim = VoucherClaim {
        voucher_id: 7,
        points: 0,
    };
    reconciler
        .begin_checkout(checkout("ORD-14", Some(claim)))
        .await
        .unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let settlement = reconciler.await_settlement("ORD-14", cancel_rx).await.unwrap();
    assert!(matches!(settlement.redemption, RedemptionOutcome::Applied(_)));

    // Abandoned after checkout, from another browser profile
    let mut abandoned = checkout("ORD-15", None);
    abandoned.profile_id = "profile-2".to_string();
    reconciler.begin_checkout(abandoned).await.unwrap();
    assert_eq!(h.channel.profile_count().await, 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(reconciler.evict_idle().await, 0);
    assert_eq!(reconciler.tracked_orders().await, 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(reconciler.evict_idle().await, 2);
    assert_eq!(reconciler.tracked_orders().await, 0);
    assert_eq!(h.channel.profile_count().await, 0);
    assert!(reconciler.order("ORD-14").await.is_none());
    assert!(reconciler.session("ORD-15").await.is_none());

    // The ledger outlives the order
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_checkout_from_new_profile_clears_old_profile_record() {
    let gateway = ScriptedGateway::new().with_order("ORD-16", "pending", &[Step::Status("pending")]);
    let h = harness(gateway);

    h.reconciler
        .begin_checkout(checkout("ORD-16", None))
        .await
        .unwrap();
    assert!(h.channel.read_payment_data(PROFILE).await.unwrap().is_some());

    let mut moved = checkout("ORD-16", None);
    moved.profile_id = "profile-2".to_string();
    h.reconciler.begin_checkout(moved).await.unwrap();

    assert!(h.channel.read_payment_data(PROFILE).await.unwrap().is_none());
    let record = h.channel.read_payment_data("profile-2").await.unwrap().unwrap();
    assert_eq!(record.order_code, "ORD-16");
    assert_eq!(h.channel.profile_count().await, 1);
}
