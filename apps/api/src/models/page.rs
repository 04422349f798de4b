use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;
use crate::graph::PageCredentials;

/// A connected business page. `external_id` is the platform's page id.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Page {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Start time of the most recent (possibly partial) sync pass.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Lower bound of the window a partial pass left unprocessed. `None` with
    /// a `sync_backlog_until` means the window is unbounded below.
    pub sync_backlog_floor: Option<DateTime<Utc>>,
    pub sync_backlog_until: Option<DateTime<Utc>>,
}

/// Conversations a partial sync did not get to: everything updated between
/// `floor` (or the beginning, when `None`) and `until`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncBacklog {
    pub floor: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

impl SyncBacklog {
    pub fn covers(&self, updated_at: DateTime<Utc>) -> bool {
        updated_at <= self.until && self.floor.map_or(true, |floor| updated_at >= floor)
    }
}

impl Page {
    pub fn sync_backlog(&self) -> Option<SyncBacklog> {
        self.sync_backlog_until.map(|until| SyncBacklog {
            floor: self.sync_backlog_floor,
            until,
        })
    }

    /// Outbound credentials for this page. A missing token is a credential
    /// fault: nothing can be sent or fetched until the page is reconnected.
    pub fn credentials(&self) -> Result<PageCredentials, AppError> {
        let token = self
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::ReconnectRequired(format!("Page {} has no access token", self.id))
            })?;

        Ok(PageCredentials {
            page_id: self.external_id.clone(),
            access_token: token.to_string(),
        })
    }
}
