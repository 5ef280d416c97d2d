//! Provider callback landing route, served to the secondary tab

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::AppResult;
use crate::reconciler::{
    plan_handoff, CallbackParams, ChannelMessage, HandoffPlan, ProviderFamily, ReconcileError,
};

/// GET /payment/callback/{family}
///
/// Never touches order state. The published advisory only prompts the primary
/// side to ask the order service for the real status.
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Query(params): Query<CallbackParams>,
) -> AppResult<Json<HandoffPlan>> {
    let family: ProviderFamily = family.parse()?;
    if params.profile_id.trim().is_empty() {
        return Err(ReconcileError::invalid("profile_id", "must not be empty").into());
    }

    info!(
        family = %family,
        profile_id = %params.profile_id,
        order_code = ?params.order_code,
        "provider callback received"
    );

    let message = ChannelMessage::advisory(
        params.order_code.clone(),
        family,
        params.callback_result(),
    );
    match state.channel.publish(&params.profile_id, message).await {
        Ok(()) => {
            let reconciler = state.reconciler.clone();
            let profile_id = params.profile_id.clone();
            tokio::spawn(async move {
                match reconciler.drain_advisory(&profile_id).await {
                    Ok(handled) => debug!(profile_id = %profile_id, handled, "callback advisories ingested"),
                    Err(e) => warn!(profile_id = %profile_id, error = %e, "callback advisories not ingested"),
                }
            });
        }
        Err(e) => warn!(family = %family, error = %e, "advisory publish failed"),
    }

    let plan = plan_handoff(family, &params, state.channel.as_ref(), &state.handoff).await;
    Ok(Json(plan))
}
