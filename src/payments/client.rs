use crate::orders::model::Order;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    CheckStatusRequest, CheckStatusResponse, CustomerPoints, CustomerVoucher,
    ProcessPaymentRequest, ProcessPaymentResponse,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            bearer_token: None,
            timeout_secs: 15,
        }
    }
}

/// reqwest client for the external order service.
///
/// Every call is a single attempt: a failure is returned to the caller as-is.
/// Only the status poller retries, on its own schedule.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let mut request = self.client.request(method.clone(), self.endpoint(path));
        if let Some(token) = self.config.bearer_token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError {
                message: format!("order service request failed: {}", e),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!(method = %method, path = %path, status = %status, "order service responded");

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| GatewayError::DecodeError {
                message: format!("{} {}: {}", method, path, e),
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound {
                resource: path.to_string(),
            });
        }

        if status.is_server_error() {
            warn!(method = %method, path = %path, status = %status, "order service server error");
        }
        Err(GatewayError::ServiceError {
            status: status.as_u16(),
            message: text,
        })
    }

    fn to_body<T: serde::Serialize>(value: &T) -> GatewayResult<JsonValue> {
        serde_json::to_value(value).map_err(|e| GatewayError::ValidationError {
            message: format!("request could not be encoded: {}", e),
            field: None,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn get_order(&self, order_code: &str) -> GatewayResult<Order> {
        if order_code.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "order_code is required".to_string(),
                field: Some("order_code".to_string()),
            });
        }
        self.request_json(Method::GET, &format!("/orders/{}", order_code), None)
            .await
    }

    async fn process_payment(
        &self,
        request: ProcessPaymentRequest,
    ) -> GatewayResult<ProcessPaymentResponse> {
        let payload = Self::to_body(&request)?;
        let response: ProcessPaymentResponse = self
            .request_json(Method::POST, "/payment/process", Some(&payload))
            .await?;
        info!(
            order_code = %response.order_code,
            payment_method = %response.payment_method,
            payment_status = %response.payment_status,
            "payment processing started"
        );
        Ok(response)
    }

    async fn check_status(&self, request: CheckStatusRequest) -> GatewayResult<CheckStatusResponse> {
        let payload = Self::to_body(&request)?;
        self.request_json(Method::POST, "/payment/check-status", Some(&payload))
            .await
    }

    async fn list_vouchers(&self) -> GatewayResult<Vec<CustomerVoucher>> {
        self.request_json(Method::GET, "/customer/vouchers", None)
            .await
    }

    async fn customer_points(&self) -> GatewayResult<CustomerPoints> {
        self.request_json(Method::GET, "/customer/points", None)
            .await
    }
}
