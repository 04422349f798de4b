//! Axum route handlers for page sync and contact removal.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{delete_contacts, DeleteSummary, SyncEngine, SyncSummary};
use crate::batch::Deadline;
use crate::errors::AppError;
use crate::state::AppState;
use crate::store::require_page;

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub force_full_sync: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteContactsRequest {
    pub contact_ids: Vec<Uuid>,
}

/// POST /api/v1/pages/:id/sync
///
/// Body is optional; `{"force_full_sync": true}` ignores the checkpoint.
pub async fn handle_sync_page(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    request: Option<Json<SyncRequest>>,
) -> Result<Json<SyncSummary>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let deadline = Deadline::starting_now(state.config.operation_budget());
    let summary = SyncEngine::from_state(&state)
        .sync_page(page_id, request.force_full_sync, deadline)
        .await?;
    Ok(Json(summary))
}

/// POST /api/v1/pages/:id/contacts/delete
pub async fn handle_delete_contacts(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
    Json(request): Json<DeleteContactsRequest>,
) -> Result<Json<DeleteSummary>, AppError> {
    require_page(state.pages.as_ref(), page_id).await?;
    let summary = delete_contacts(state.contacts.as_ref(), page_id, &request.contact_ids).await?;
    Ok(Json(summary))
}
