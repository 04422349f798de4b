//! Axum route handlers for campaign dispatch.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::{cancel_campaign, DispatchSummary, Dispatcher};
use crate::batch::Deadline;
use crate::errors::AppError;
use crate::models::campaign::CampaignStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub sent_count: i32,
}

/// POST /api/v1/campaigns/:id/send
///
/// Runs one dispatch pass. A `partial: true` response means the request budget
/// ran out; call again to continue with the remaining recipients.
pub async fn handle_send_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<DispatchSummary>, AppError> {
    let deadline = Deadline::starting_now(state.config.operation_budget());
    let summary = Dispatcher::from_state(&state)
        .send_campaign(campaign_id, deadline)
        .await?;
    Ok(Json(summary))
}

/// POST /api/v1/campaigns/:id/cancel
pub async fn handle_cancel_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let campaign = cancel_campaign(state.campaigns.as_ref(), campaign_id).await?;
    Ok(Json(CancelResponse {
        campaign_id,
        status: campaign.status,
        sent_count: campaign.sent_count,
    }))
}
