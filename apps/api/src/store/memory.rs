//! In-memory store for deterministic tests.
//!
//! Mirrors the conditional-update semantics of `PgStore` (pending-only status
//! changes, cancelled campaigns never flipped back) and can simulate an
//! operator cancelling a campaign after a given number of status polls.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CampaignStore, ContactStore, PageStore};
use crate::errors::AppError;
use crate::models::campaign::{
    Campaign, CampaignStatus, LoopRecipient, LoopStatus, PendingRecipient, RecipientContact,
    RecipientStatus,
};
use crate::models::contact::{Confidence, Contact, ContactUpsert, HourCount};
use crate::models::page::{Page, SyncBacklog};

#[derive(Debug, Clone)]
pub struct RecipientRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub status: RecipientStatus,
    pub error_message: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub message_sent_count: i32,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    pages: HashMap<Uuid, Page>,
    campaigns: HashMap<Uuid, Campaign>,
    recipients: Vec<RecipientRecord>,
    contacts: Vec<Contact>,
    deleted: HashSet<(Uuid, String)>,
    status_polls: usize,
    cancel_after_polls: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_page(&self, access_token: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().pages.insert(
            id,
            Page {
                id,
                external_id: "page-1".to_string(),
                name: "Corner Bakery".to_string(),
                access_token: access_token.map(String::from),
                last_synced_at: None,
                sync_backlog_floor: None,
                sync_backlog_until: None,
            },
        );
        id
    }

    pub fn page(&self, page_id: Uuid) -> Page {
        self.lock().pages[&page_id].clone()
    }

    pub fn set_page_synced_at(&self, page_id: Uuid, at: DateTime<Utc>) {
        if let Some(page) = self.lock().pages.get_mut(&page_id) {
            page.last_synced_at = Some(at);
        }
    }

    pub fn add_campaign(&self, page_id: Uuid, message: Option<&str>) -> Uuid {
        self.insert_campaign(page_id, message.map(String::from), false, None, None)
    }

    pub fn add_loop_campaign(&self, page_id: Uuid, prompt: &str, loop_status: LoopStatus) -> Uuid {
        self.insert_campaign(
            page_id,
            None,
            true,
            Some(loop_status),
            Some(prompt.to_string()),
        )
    }

    fn insert_campaign(
        &self,
        page_id: Uuid,
        message: Option<String>,
        is_loop: bool,
        loop_status: Option<LoopStatus>,
        ai_prompt: Option<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.lock().campaigns.insert(
            id,
            Campaign {
                id,
                page_id,
                name: "Weekend promo".to_string(),
                status: CampaignStatus::Draft,
                message,
                is_loop,
                loop_status,
                ai_prompt,
                total_recipients: 0,
                sent_count: 0,
                last_run_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Campaign {
        self.lock().campaigns[&campaign_id].clone()
    }

    pub fn force_campaign_status(&self, campaign_id: Uuid, status: CampaignStatus) {
        if let Some(c) = self.lock().campaigns.get_mut(&campaign_id) {
            c.status = status;
        }
    }

    /// The campaign flips to `cancelled` on the given status poll (1-based).
    pub fn cancel_on_poll(&self, poll: usize) {
        self.lock().cancel_after_polls = Some(poll);
    }

    pub fn add_contact(&self, page_id: Uuid, psid: &str, name: Option<&str>) -> Uuid {
        self.add_contact_with_hours(page_id, psid, name, None, &[])
    }

    pub fn set_interaction_count(&self, contact_id: Uuid, count: u32) {
        if let Some(c) = self.lock().contacts.iter_mut().find(|c| c.id == contact_id) {
            c.interaction_count = count;
        }
    }

    pub fn add_contact_with_hours(
        &self,
        page_id: Uuid,
        psid: &str,
        name: Option<&str>,
        best_contact_hour: Option<u8>,
        top_hours: &[(u8, u32)],
    ) -> Uuid {
        let id = Uuid::new_v4();
        let top_hours: Vec<HourCount> = top_hours
            .iter()
            .map(|(hour, count)| HourCount {
                hour: *hour,
                count: *count,
            })
            .collect();
        self.lock().contacts.push(Contact {
            id,
            page_id,
            psid: psid.to_string(),
            name: name.map(String::from),
            profile_pic: None,
            last_interaction_at: None,
            interaction_count: top_hours.iter().map(|h| h.count).sum(),
            best_contact_hour,
            best_contact_confidence: Confidence::None,
            top_hours,
        });
        id
    }

    pub fn contact_by_psid(&self, page_id: Uuid, psid: &str) -> Option<Contact> {
        self.lock()
            .contacts
            .iter()
            .find(|c| c.page_id == page_id && c.psid == psid)
            .cloned()
    }

    pub fn contact_count(&self, page_id: Uuid) -> usize {
        self.lock()
            .contacts
            .iter()
            .filter(|c| c.page_id == page_id)
            .count()
    }

    pub fn tombstone(&self, page_id: Uuid, psid: &str) {
        self.lock().deleted.insert((page_id, psid.to_string()));
    }

    pub fn is_tombstoned(&self, page_id: Uuid, psid: &str) -> bool {
        self.lock().deleted.contains(&(page_id, psid.to_string()))
    }

    pub fn add_recipient(&self, campaign_id: Uuid, contact_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().recipients.push(RecipientRecord {
            id,
            campaign_id,
            contact_id,
            status: RecipientStatus::Pending,
            error_message: None,
            scheduled_at: None,
            next_scheduled_at: None,
            message_sent_count: 0,
            last_contacted_at: None,
            sent_at: None,
        });
        id
    }

    pub fn update_recipient(&self, recipient_id: Uuid, f: impl FnOnce(&mut RecipientRecord)) {
        let mut inner = self.lock();
        if let Some(r) = inner.recipients.iter_mut().find(|r| r.id == recipient_id) {
            f(r);
        }
    }

    pub fn recipient(&self, recipient_id: Uuid) -> RecipientRecord {
        self.lock()
            .recipients
            .iter()
            .find(|r| r.id == recipient_id)
            .cloned()
            .unwrap()
    }

    pub fn recipients_with_status(&self, campaign_id: Uuid, status: RecipientStatus) -> usize {
        self.lock()
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id && r.status == status)
            .count()
    }

    fn recipient_contact(inner: &Inner, contact_id: Option<Uuid>) -> Option<RecipientContact> {
        let contact = inner.contacts.iter().find(|c| Some(c.id) == contact_id)?;
        Some(RecipientContact {
            contact_id: contact.id,
            psid: Some(contact.psid.clone()).filter(|p| !p.is_empty()),
            name: contact.name.clone(),
            best_contact_hour: contact.best_contact_hour,
        })
    }

    fn loop_recipient(inner: &Inner, r: &RecipientRecord) -> LoopRecipient {
        LoopRecipient {
            id: r.id,
            status: r.status,
            scheduled_at: r.scheduled_at,
            next_scheduled_at: r.next_scheduled_at,
            message_sent_count: r.message_sent_count,
            last_contacted_at: r.last_contacted_at,
            contact: Self::recipient_contact(inner, r.contact_id),
        }
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn get_page(&self, page_id: Uuid) -> Result<Option<Page>, AppError> {
        Ok(self.lock().pages.get(&page_id).cloned())
    }

    async fn record_sync_pass(
        &self,
        page_id: Uuid,
        started_at: DateTime<Utc>,
        backlog: Option<SyncBacklog>,
    ) -> Result<(), AppError> {
        if let Some(page) = self.lock().pages.get_mut(&page_id) {
            page.last_synced_at = Some(started_at);
            page.sync_backlog_floor = backlog.and_then(|b| b.floor);
            page.sync_backlog_until = backlog.map(|b| b.until);
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<Campaign>, AppError> {
        Ok(self.lock().campaigns.get(&campaign_id).cloned())
    }

    async fn campaign_status(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignStatus>, AppError> {
        let mut inner = self.lock();
        inner.status_polls += 1;
        if inner.cancel_after_polls == Some(inner.status_polls) {
            if let Some(c) = inner.campaigns.get_mut(&campaign_id) {
                c.status = CampaignStatus::Cancelled;
            }
        }
        Ok(inner.campaigns.get(&campaign_id).map(|c| c.status))
    }

    async fn begin_sending(
        &self,
        campaign_id: Uuid,
        total_recipients: i32,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.campaigns.get_mut(&campaign_id) {
            Some(c)
                if matches!(
                    c.status,
                    CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Sending
                ) =>
            {
                c.status = CampaignStatus::Sending;
                c.total_recipients = total_recipients;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), AppError> {
        if let Some(c) = self.lock().campaigns.get_mut(&campaign_id) {
            if c.status != CampaignStatus::Cancelled {
                c.status = status;
            }
        }
        Ok(())
    }

    async fn cancel_campaign(&self, campaign_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.campaigns.get_mut(&campaign_id) {
            Some(c)
                if matches!(
                    c.status,
                    CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Sending
                ) =>
            {
                c.status = CampaignStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_sent_count(&self, campaign_id: Uuid, delta: i32) -> Result<(), AppError> {
        if let Some(c) = self.lock().campaigns.get_mut(&campaign_id) {
            c.sent_count += delta;
        }
        Ok(())
    }

    async fn count_recipients(&self, campaign_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .lock()
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .count() as i64)
    }

    async fn pending_recipients(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<PendingRecipient>, AppError> {
        let inner = self.lock();
        Ok(inner
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id && r.status == RecipientStatus::Pending)
            .map(|r| PendingRecipient {
                id: r.id,
                contact: Self::recipient_contact(&inner, r.contact_id),
            })
            .collect())
    }

    async fn mark_recipient_sent(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_recipient(recipient_id, |r| {
            if r.status == RecipientStatus::Pending {
                r.status = RecipientStatus::Sent;
                r.sent_at = Some(at);
                r.error_message = None;
            }
        });
        Ok(())
    }

    async fn mark_recipient_failed(
        &self,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<(), AppError> {
        self.update_recipient(recipient_id, |r| {
            if r.status == RecipientStatus::Pending {
                r.status = RecipientStatus::Failed;
                r.error_message = Some(error.to_string());
            }
        });
        Ok(())
    }

    async fn active_loop_campaigns(&self, limit: i64) -> Result<Vec<Campaign>, AppError> {
        let mut campaigns: Vec<Campaign> = self
            .lock()
            .campaigns
            .values()
            .filter(|c| {
                c.is_loop
                    && c.loop_status == Some(LoopStatus::Active)
                    && c.status != CampaignStatus::Cancelled
            })
            .cloned()
            .collect();
        // NULLS FIRST, then oldest run first
        campaigns.sort_by_key(|c| (c.last_run_at.is_some(), c.last_run_at, c.created_at));
        campaigns.truncate(limit.max(0) as usize);
        Ok(campaigns)
    }

    async fn due_loop_recipients(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LoopRecipient>, AppError> {
        let inner = self.lock();
        Ok(inner
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| Self::loop_recipient(&inner, r))
            .filter(|r| r.is_due(now))
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn unscheduled_loop_recipients(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<LoopRecipient>, AppError> {
        let inner = self.lock();
        Ok(inner
            .recipients
            .iter()
            .filter(|r| {
                r.campaign_id == campaign_id
                    && r.status == RecipientStatus::Pending
                    && r.scheduled_at.is_none()
                    && r.next_scheduled_at.is_none()
            })
            .map(|r| Self::loop_recipient(&inner, r))
            .collect())
    }

    async fn schedule_recipient(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_recipient(recipient_id, |r| r.scheduled_at = Some(at));
        Ok(())
    }

    async fn record_loop_success(
        &self,
        recipient_id: Uuid,
        contacted_at: DateTime<Utc>,
        next_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_recipient(recipient_id, |r| {
            r.message_sent_count += 1;
            r.last_contacted_at = Some(contacted_at);
            r.next_scheduled_at = Some(next_at);
            r.scheduled_at = None;
            r.error_message = None;
        });
        Ok(())
    }

    async fn record_loop_failure(
        &self,
        recipient_id: Uuid,
        error: &str,
        next_at: DateTime<Utc>,
        give_up: bool,
    ) -> Result<(), AppError> {
        self.update_recipient(recipient_id, |r| {
            r.error_message = Some(error.to_string());
            if give_up {
                r.status = RecipientStatus::Failed;
            } else {
                r.next_scheduled_at = Some(next_at);
                r.scheduled_at = None;
            }
        });
        Ok(())
    }

    async fn mark_campaign_run(
        &self,
        campaign_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(c) = self.lock().campaigns.get_mut(&campaign_id) {
            c.last_run_at = Some(at);
        }
        Ok(())
    }

    async fn set_loop_status(
        &self,
        campaign_id: Uuid,
        status: LoopStatus,
    ) -> Result<(), AppError> {
        if let Some(c) = self.lock().campaigns.get_mut(&campaign_id) {
            c.loop_status = Some(status);
        }
        Ok(())
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn known_psids(&self, page_id: Uuid) -> Result<HashSet<String>, AppError> {
        Ok(self
            .lock()
            .contacts
            .iter()
            .filter(|c| c.page_id == page_id)
            .map(|c| c.psid.clone())
            .collect())
    }

    async fn deleted_psids(&self, page_id: Uuid) -> Result<HashSet<String>, AppError> {
        Ok(self
            .lock()
            .deleted
            .iter()
            .filter(|(p, _)| *p == page_id)
            .map(|(_, psid)| psid.clone())
            .collect())
    }

    async fn upsert_contact(&self, upsert: &ContactUpsert) -> Result<Uuid, AppError> {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .contacts
            .iter_mut()
            .find(|c| c.page_id == upsert.page_id && c.psid == upsert.psid)
        {
            if upsert.name.is_some() {
                existing.name = upsert.name.clone();
            }
            if upsert.profile_pic.is_some() {
                existing.profile_pic = upsert.profile_pic.clone();
            }
            existing.last_interaction_at = Some(upsert.last_interaction_at);
            if let Some(history) = &upsert.history {
                existing.interaction_count = history.interaction_count;
                existing.best_contact_hour = history.best_contact_hour;
                existing.best_contact_confidence = history.best_contact_confidence;
                existing.top_hours = history.top_hours.clone();
            }
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        let history = upsert.history.clone();
        inner.contacts.push(Contact {
            id,
            page_id: upsert.page_id,
            psid: upsert.psid.clone(),
            name: upsert.name.clone(),
            profile_pic: upsert.profile_pic.clone(),
            last_interaction_at: Some(upsert.last_interaction_at),
            interaction_count: history.as_ref().map_or(0, |h| h.interaction_count),
            best_contact_hour: history.as_ref().and_then(|h| h.best_contact_hour),
            best_contact_confidence: history
                .as_ref()
                .map_or(Confidence::None, |h| h.best_contact_confidence),
            top_hours: history.map(|h| h.top_hours).unwrap_or_default(),
        });
        Ok(id)
    }

    async fn clear_deleted(&self, page_id: Uuid, psids: &[String]) -> Result<(), AppError> {
        let mut inner = self.lock();
        for psid in psids {
            inner.deleted.remove(&(page_id, psid.clone()));
        }
        Ok(())
    }

    async fn delete_contacts(&self, page_id: Uuid, contact_ids: &[Uuid]) -> Result<u64, AppError> {
        let mut inner = self.lock();
        let (removed, kept): (Vec<Contact>, Vec<Contact>) = inner
            .contacts
            .drain(..)
            .partition(|c| c.page_id == page_id && contact_ids.contains(&c.id));
        inner.contacts = kept;
        for c in &removed {
            inner.deleted.insert((page_id, c.psid.clone()));
        }
        Ok(removed.len() as u64)
    }

    async fn contacts_for_page(&self, page_id: Uuid) -> Result<Vec<Contact>, AppError> {
        Ok(self
            .lock()
            .contacts
            .iter()
            .filter(|c| c.page_id == page_id)
            .cloned()
            .collect())
    }

    async fn get_contact(
        &self,
        page_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Contact>, AppError> {
        Ok(self
            .lock()
            .contacts
            .iter()
            .find(|c| c.page_id == page_id && c.id == contact_id)
            .cloned())
    }

    async fn save_best_time(
        &self,
        contact_id: Uuid,
        hour: Option<u8>,
        confidence: Confidence,
    ) -> Result<(), AppError> {
        if let Some(c) = self.lock().contacts.iter_mut().find(|c| c.id == contact_id) {
            c.best_contact_hour = hour;
            c.best_contact_confidence = confidence;
        }
        Ok(())
    }
}
