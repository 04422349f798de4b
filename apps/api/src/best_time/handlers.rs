//! Axum route handlers for best contact hour queries.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use super::{
    contact_best_time, page_overview, recompute_page, ContactBestTime, PageBestTimeOverview,
    RecomputeSummary,
};
use crate::errors::AppError;
use crate::state::AppState;
use crate::store::require_page;

/// GET /api/v1/pages/:id/best-time
pub async fn handle_page_best_time(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
) -> Result<Json<PageBestTimeOverview>, AppError> {
    require_page(state.pages.as_ref(), page_id).await?;
    let overview = page_overview(state.contacts.as_ref(), page_id).await?;
    Ok(Json(overview))
}

/// GET /api/v1/pages/:id/contacts/:contact_id/best-time
///
/// Read-only: the estimate is computed fresh and not persisted.
pub async fn handle_contact_best_time(
    State(state): State<AppState>,
    Path((page_id, contact_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ContactBestTime>, AppError> {
    require_page(state.pages.as_ref(), page_id).await?;
    let result = contact_best_time(
        state.contacts.as_ref(),
        page_id,
        contact_id,
        &state.config.best_time,
    )
    .await?;
    Ok(Json(result))
}

/// POST /api/v1/pages/:id/best-time/recompute
pub async fn handle_recompute_best_time(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
) -> Result<Json<RecomputeSummary>, AppError> {
    require_page(state.pages.as_ref(), page_id).await?;
    let summary =
        recompute_page(state.contacts.as_ref(), page_id, &state.config.best_time).await?;
    Ok(Json(summary))
}
