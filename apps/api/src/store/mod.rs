//! Storage seams consumed by the dispatch, sync, loop and best-time services.
//!
//! `PgStore` implements all three traits over Postgres. Every method touches a
//! single row or runs a single statement; the only shared counters
//! (`sent_count`, campaign status) are updated with one atomic statement each.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::campaign::{
    Campaign, CampaignStatus, LoopRecipient, LoopStatus, PendingRecipient,
};
use crate::models::contact::{Confidence, Contact, ContactUpsert};
use crate::models::page::{Page, SyncBacklog};

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

pub async fn require_page(pages: &dyn PageStore, page_id: Uuid) -> Result<Page, AppError> {
    pages
        .get_page(page_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Page {page_id} not found")))
}

pub async fn require_campaign(
    campaigns: &dyn CampaignStore,
    campaign_id: Uuid,
) -> Result<Campaign, AppError> {
    campaigns
        .get_campaign(campaign_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {campaign_id} not found")))
}

#[async_trait]
pub trait PageStore: Send + Sync {
    async fn get_page(&self, page_id: Uuid) -> Result<Option<Page>, AppError>;

    /// Records the start time of the latest sync pass and the window it left
    /// unprocessed (`None` clears it).
    async fn record_sync_pass(
        &self,
        page_id: Uuid,
        started_at: DateTime<Utc>,
        backlog: Option<SyncBacklog>,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<Campaign>, AppError>;

    /// Current status only; polled between dispatch groups.
    async fn campaign_status(&self, campaign_id: Uuid)
        -> Result<Option<CampaignStatus>, AppError>;

    /// Moves a `draft|scheduled|sending` campaign to `sending` and records the
    /// recipient total. Returns false when the campaign is in any other state.
    async fn begin_sending(&self, campaign_id: Uuid, total_recipients: i32)
        -> Result<bool, AppError>;

    /// Sets `status` unconditionally unless the campaign was cancelled.
    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), AppError>;

    /// Flips `draft|scheduled|sending` to `cancelled`. Returns false otherwise.
    async fn cancel_campaign(&self, campaign_id: Uuid) -> Result<bool, AppError>;

    /// Adds to the cumulative sent counter; both one-shot dispatch and loop
    /// sends are counted.
    async fn add_sent_count(&self, campaign_id: Uuid, delta: i32) -> Result<(), AppError>;

    async fn count_recipients(&self, campaign_id: Uuid) -> Result<i64, AppError>;

    /// `pending` recipients of a one-shot campaign in insertion order.
    async fn pending_recipients(&self, campaign_id: Uuid)
        -> Result<Vec<PendingRecipient>, AppError>;

    async fn mark_recipient_sent(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn mark_recipient_failed(&self, recipient_id: Uuid, error: &str)
        -> Result<(), AppError>;

    /// Loop campaigns with `loop_status = active` that are not cancelled,
    /// least recently run first.
    async fn active_loop_campaigns(&self, limit: i64) -> Result<Vec<Campaign>, AppError>;

    /// Due recipients: `pending` with `scheduled_at` or `next_scheduled_at` ≤ `now`.
    async fn due_loop_recipients(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LoopRecipient>, AppError>;

    /// `pending` loop recipients with neither schedule timestamp set.
    async fn unscheduled_loop_recipients(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<LoopRecipient>, AppError>;

    async fn schedule_recipient(&self, recipient_id: Uuid, at: DateTime<Utc>)
        -> Result<(), AppError>;

    /// Successful loop send: bumps `message_sent_count`, stamps
    /// `last_contacted_at`, sets `next_scheduled_at` and clears `scheduled_at`.
    async fn record_loop_success(
        &self,
        recipient_id: Uuid,
        contacted_at: DateTime<Utc>,
        next_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Failed loop send. With `give_up` the recipient becomes `failed`;
    /// otherwise it stays `pending` and is rescheduled to `next_at`.
    async fn record_loop_failure(
        &self,
        recipient_id: Uuid,
        error: &str,
        next_at: DateTime<Utc>,
        give_up: bool,
    ) -> Result<(), AppError>;

    async fn mark_campaign_run(&self, campaign_id: Uuid, at: DateTime<Utc>)
        -> Result<(), AppError>;

    async fn set_loop_status(&self, campaign_id: Uuid, status: LoopStatus)
        -> Result<(), AppError>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn known_psids(&self, page_id: Uuid) -> Result<HashSet<String>, AppError>;

    /// PSIDs removed by an explicit bulk delete and not seen since.
    async fn deleted_psids(&self, page_id: Uuid) -> Result<HashSet<String>, AppError>;

    /// Inserts or updates by `(page_id, psid)` and returns the contact id.
    async fn upsert_contact(&self, contact: &ContactUpsert) -> Result<Uuid, AppError>;

    async fn clear_deleted(&self, page_id: Uuid, psids: &[String]) -> Result<(), AppError>;

    /// Deletes contacts and tombstones their PSIDs. Returns the number deleted.
    async fn delete_contacts(&self, page_id: Uuid, contact_ids: &[Uuid]) -> Result<u64, AppError>;

    async fn contacts_for_page(&self, page_id: Uuid) -> Result<Vec<Contact>, AppError>;

    async fn get_contact(&self, page_id: Uuid, contact_id: Uuid)
        -> Result<Option<Contact>, AppError>;

    async fn save_best_time(
        &self,
        contact_id: Uuid,
        hour: Option<u8>,
        confidence: Confidence,
    ) -> Result<(), AppError>;
}
