//! Sync Engine: conversation ingestion into contact records, plus the explicit
//! bulk contact delete whose tombstones let a later sync report restorations.

mod engine;
pub mod handlers;
mod history;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::store::ContactStore;

pub use engine::{SyncEngine, SyncSummary};

#[derive(Debug, Serialize)]
pub struct DeleteSummary {
    pub requested: usize,
    pub deleted: u64,
}

/// Deletes contacts of one page. Ids belonging to other pages are ignored.
pub async fn delete_contacts(
    contacts: &dyn ContactStore,
    page_id: Uuid,
    contact_ids: &[Uuid],
) -> Result<DeleteSummary, AppError> {
    if contact_ids.is_empty() {
        return Err(AppError::Validation(
            "contact_ids cannot be empty".to_string(),
        ));
    }

    let deleted = contacts.delete_contacts(page_id, contact_ids).await?;
    info!(page_id = %page_id, deleted, "Contacts deleted");

    Ok(DeleteSummary {
        requested: contact_ids.len(),
        deleted,
    })
}
