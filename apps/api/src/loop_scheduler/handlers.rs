//! Axum route handlers for loop campaigns.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{set_loop_status, LoopScheduler, LoopStatusChange, TickSummary};
use crate::errors::AppError;
use crate::models::campaign::LoopStatus;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoopStatusRequest {
    pub loop_status: LoopStatus,
}

/// Shared secret presented as `x-cron-secret` or `Authorization: Bearer`.
fn presented_secret(headers: &HeaderMap) -> Option<&str> {
    if let Some(secret) = headers.get("x-cron-secret").and_then(|v| v.to_str().ok()) {
        return Some(secret);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn verify_cron_secret(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = expected.ok_or_else(|| {
        AppError::Configuration("CRON_SECRET is not set; loop ticks are disabled".to_string())
    })?;
    match presented_secret(headers) {
        Some(secret) if secret == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

/// POST /api/v1/loop/tick
///
/// Called by an external scheduler about once a minute.
pub async fn handle_loop_tick(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TickSummary>, AppError> {
    verify_cron_secret(state.config.cron_secret.as_deref(), &headers)?;
    let summary = LoopScheduler::from_state(&state)?.run_tick().await?;
    Ok(Json(summary))
}

/// PATCH /api/v1/campaigns/:id/loop
pub async fn handle_set_loop_status(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(request): Json<LoopStatusRequest>,
) -> Result<Json<LoopStatusChange>, AppError> {
    let change = set_loop_status(
        state.campaigns.as_ref(),
        campaign_id,
        request.loop_status,
        state.config.loop_settings.default_hour,
        &state.config.contact_offset,
        Utc::now(),
    )
    .await?;
    Ok(Json(change))
}
