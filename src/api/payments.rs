//! Checkout-side payment endpoints

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::error::{get_request_id_from_headers, success_response};
use crate::reconciler::CheckoutRequest;

#[derive(Debug, Deserialize)]
pub struct WaitQueryParams {
    /// Lets the wait pick up provider callbacks that landed before it started.
    pub profile_id: Option<String>,
}

fn tag_request(headers: &HeaderMap) -> impl Fn(AppError) -> AppError + '_ {
    move |err| match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}

/// POST /payment/checkout
pub async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let ticket = state
        .reconciler
        .begin_checkout(request)
        .await
        .map_err(AppError::from)
        .map_err(tag_request(&headers))?;

    Ok(success_response(ticket))
}

/// GET /payment/{order_code}/wait
///
/// Long-poll. Dropping the connection drops this future, which stops the poller.
pub async fn wait(
    State(state): State<AppState>,
    Path(order_code): Path<String>,
    Query(params): Query<WaitQueryParams>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    if let Some(profile_id) = params.profile_id.as_deref().filter(|p| !p.trim().is_empty()) {
        match state.reconciler.drain_advisory(profile_id).await {
            Ok(0) => {}
            Ok(handled) => info!(order_code = %order_code, handled, "pending advisories ingested"),
            Err(e) => warn!(order_code = %order_code, error = %e, "advisory inbox unavailable"),
        }
    }

    let settlement = state
        .reconciler
        .await_settlement(&order_code, state.shutdown.clone())
        .await
        .map_err(|e| AppError::from(e).with_context(format!("waiting on {}", order_code)))
        .map_err(tag_request(&headers))?;

    Ok(success_response(settlement))
}

/// POST /payment/{order_code}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(order_code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = state
        .reconciler
        .cancel_session(&order_code)
        .await
        .map_err(AppError::from)
        .map_err(tag_request(&headers))?;

    Ok(success_response(serde_json::json!({
        "order_code": session.order_code,
        "session_token": session.session_token,
        "cancelled": true,
    })))
}
