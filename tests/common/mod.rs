//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checkout_reconciler::ledger::{InMemoryRedemptionStore, RedemptionLedger};
use checkout_reconciler::orders::model::{Order, OrderTotals};
use checkout_reconciler::payments::error::{GatewayError, GatewayResult};
use checkout_reconciler::payments::gateway::PaymentGateway;
use checkout_reconciler::payments::types::{
    CheckStatusRequest, CheckStatusResponse, CustomerPoints, CustomerVoucher, PaymentCategory,
    PaymentMethod, ProcessPaymentRequest, ProcessPaymentResponse,
};
use checkout_reconciler::reconciler::{CheckoutRequest, InMemoryChannel, Reconciler, VoucherClaim};
use checkout_reconciler::workers::{PaymentPoller, PollerConfig};

pub const PROFILE: &str = "profile-1";

/// One scripted reply to `check-status`.
#[derive(Debug, Clone)]
pub enum Step {
    Status(&'static str),
    NetworkFailure,
}

/// In-process stand-in for the order service.
///
/// Each order replays its status script one step per `check-status` call and
/// keeps repeating the last step once the script is exhausted.
#[derive(Default)]
pub struct ScriptedGateway {
    orders: Mutex<HashMap<String, Order>>,
    process_status: Mutex<HashMap<String, &'static str>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    last_step: Mutex<HashMap<String, Step>>,
    check_calls: Mutex<HashMap<String, u32>>,
    process_calls: Mutex<HashMap<String, u32>>,
    vouchers: Mutex<Vec<CustomerVoucher>>,
    balance: Mutex<i64>,
    voucher_delay: Mutex<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(self, code: &str, process_status: &'static str, script: &[Step]) -> Self {
        let order = Order::new(code, OrderTotals::new(dec!(100000), dec!(0), dec!(15000), dec!(2500)));
        self.orders.lock().unwrap().insert(code.to_string(), order);
        self.process_status
            .lock()
            .unwrap()
            .insert(code.to_string(), process_status);
        self.scripts
            .lock()
            .unwrap()
            .insert(code.to_string(), script.iter().cloned().collect());
        self
    }

    pub fn with_voucher(self, id: i64, required_points: i64) -> Self {
        let now = Utc::now();
        self.vouchers.lock().unwrap().push(CustomerVoucher {
            id,
            name: format!("voucher-{}", id),
            required_points,
            start_date: now - ChronoDuration::days(1),
            end_date: now + ChronoDuration::days(30),
            is_used: false,
        });
        self
    }

    pub fn with_balance(self, balance: i64) -> Self {
        *self.balance.lock().unwrap() = balance;
        self
    }

    /// Slows down `list_vouchers`, keeping a redemption in flight.
    pub fn with_voucher_delay(self, delay: Duration) -> Self {
        *self.voucher_delay.lock().unwrap() = delay;
        self
    }

    /// Appends steps to an order's script.
    pub fn then(&self, code: &str, steps: &[Step]) {
        self.scripts
            .lock()
            .unwrap()
            .entry(code.to_string())
            .or_default()
            .extend(steps.iter().cloned());
    }

    pub fn check_calls(&self, code: &str) -> u32 {
        self.check_calls.lock().unwrap().get(code).copied().unwrap_or(0)
    }

    pub fn process_calls(&self, code: &str) -> u32 {
        self.process_calls.lock().unwrap().get(code).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn get_order(&self, order_code: &str) -> GatewayResult<Order> {
        self.orders
            .lock()
            .unwrap()
            .get(order_code)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                resource: format!("/orders/{}", order_code),
            })
    }

    async fn process_payment(
        &self,
        request: ProcessPaymentRequest,
    ) -> GatewayResult<ProcessPaymentResponse> {
        *self
            .process_calls
            .lock()
            .unwrap()
            .entry(request.order_code.clone())
            .or_default() += 1;
        let status = self
            .process_status
            .lock()
            .unwrap()
            .get(&request.order_code)
            .copied()
            .unwrap_or("pending");
        Ok(ProcessPaymentResponse {
            order_code: request.order_code.clone(),
            payment_method: request.payment_method_code,
            payment_status: status.to_string(),
            grand_total: dec!(117500),
            expired_at: Some(Utc::now() + ChronoDuration::minutes(15)),
            qr_code_url: None,
            deeplink: Some(format!("dana://pay?order={}", request.order_code)),
            va_number: None,
            payment_code: None,
            company_code: None,
        })
    }

    async fn check_status(&self, request: CheckStatusRequest) -> GatewayResult<CheckStatusResponse> {
        let code = request.order_code;
        *self.check_calls.lock().unwrap().entry(code.clone()).or_default() += 1;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&code)
            .and_then(|script| script.pop_front());
        let step = match next {
            Some(step) => {
                self.last_step.lock().unwrap().insert(code.clone(), step.clone());
                step
            }
            None => self
                .last_step
                .lock()
                .unwrap()
                .get(&code)
                .cloned()
                .unwrap_or(Step::Status("pending")),
        };

        match step {
            Step::Status(status) => Ok(CheckStatusResponse {
                payment_status: status.to_string(),
                transaction_status: None,
                order_code: code,
            }),
            Step::NetworkFailure => Err(GatewayError::NetworkError {
                message: "connection reset by peer".to_string(),
            }),
        }
    }

    async fn list_vouchers(&self) -> GatewayResult<Vec<CustomerVoucher>> {
        let delay = *self.voucher_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.vouchers.lock().unwrap().clone())
    }

    async fn customer_points(&self) -> GatewayResult<CustomerPoints> {
        Ok(CustomerPoints {
            balance: *self.balance.lock().unwrap(),
        })
    }
}

pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub channel: Arc<InMemoryChannel>,
    pub store: Arc<InMemoryRedemptionStore>,
    pub reconciler: Reconciler,
}

pub fn harness(gateway: ScriptedGateway) -> Harness {
    harness_with(gateway, Duration::from_secs(900))
}

pub fn harness_with(gateway: ScriptedGateway, max_duration: Duration) -> Harness {
    let gateway = Arc::new(gateway);
    let channel = Arc::new(InMemoryChannel::new());
    let store = Arc::new(InMemoryRedemptionStore::new());
    let ledger = Arc::new(RedemptionLedger::new(gateway.clone(), store.clone()));
    let poller = Arc::new(PaymentPoller::new(
        gateway.clone(),
        PollerConfig {
            interval: Duration::from_secs(3),
            max_duration,
        },
    ));
    let reconciler = Reconciler::new(gateway.clone(), channel.clone(), ledger, poller);
    Harness {
        gateway,
        channel,
        store,
        reconciler,
    }
}

pub fn checkout(order_code: &str, voucher: Option<VoucherClaim>) -> CheckoutRequest {
    CheckoutRequest {
        order_code: order_code.to_string(),
        profile_id: PROFILE.to_string(),
        payment_method: PaymentMethod {
            code: "dana".to_string(),
            category: PaymentCategory::EWallet,
        },
        shipping_address: "Jl. Sudirman 1, Jakarta".to_string(),
        shipping_recipient_name: "Rina".to_string(),
        shipping_recipient_phone: "081234567890".to_string(),
        voucher,
    }
}
