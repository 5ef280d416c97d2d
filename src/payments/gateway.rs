use crate::orders::model::Order;
use crate::payments::error::GatewayResult;
use crate::payments::types::{
    CheckStatusRequest, CheckStatusResponse, CustomerPoints, CustomerVoucher,
    ProcessPaymentRequest, ProcessPaymentResponse,
};
use async_trait::async_trait;

/// The external order service: the only authoritative source of payment status.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_order(&self, order_code: &str) -> GatewayResult<Order>;

    async fn process_payment(
        &self,
        request: ProcessPaymentRequest,
    ) -> GatewayResult<ProcessPaymentResponse>;

    async fn check_status(&self, request: CheckStatusRequest) -> GatewayResult<CheckStatusResponse>;

    async fn list_vouchers(&self) -> GatewayResult<Vec<CustomerVoucher>>;

    async fn customer_points(&self) -> GatewayResult<CustomerPoints>;
}
