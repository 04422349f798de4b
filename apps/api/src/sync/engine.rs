use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::history::build_interaction_summary;
use crate::batch::{with_timeout, BatchRunner, Deadline, StopReason};
use crate::config::SyncSettings;
use crate::errors::AppError;
use crate::graph::{ConversationSource, PageCredentials, Profile, RemoteConversation};
use crate::models::contact::ContactUpsert;
use crate::models::page::{Page, SyncBacklog};
use crate::state::AppState;
use crate::store::{require_page, ContactStore, PageStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    /// Listed conversations this pass did not reach.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remaining_conversation_ids: Vec<String>,
    /// Window the next pass will pick up even though it predates the checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backlog: Option<SyncBacklog>,
    pub incremental: bool,
    pub restored: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restored_psids: Vec<String>,
    /// The checkpoint written by this pass.
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Listing {
    conversations: Vec<RemoteConversation>,
    /// Set when the deadline stopped the listing before its last page.
    truncated_at: Option<DateTime<Utc>>,
}

/// Which conversations one pass fetches.
struct SyncWindow {
    /// Listing stops at the first conversation updated before this.
    since: Option<DateTime<Utc>>,
    checkpoint: Option<DateTime<Utc>>,
    backlog: Option<SyncBacklog>,
}

impl SyncWindow {
    fn for_page(page: &Page, force_full: bool) -> Self {
        if force_full {
            return Self {
                since: None,
                checkpoint: None,
                backlog: None,
            };
        }
        match page.sync_backlog() {
            Some(backlog) => Self {
                since: backlog.floor,
                checkpoint: page.last_synced_at,
                backlog: Some(backlog),
            },
            None => Self {
                since: page.last_synced_at,
                checkpoint: page.last_synced_at,
                backlog: None,
            },
        }
    }

    fn is_incremental(&self) -> bool {
        self.checkpoint.is_some()
    }

    fn is_before(&self, updated_at: DateTime<Utc>) -> bool {
        self.since.is_some_and(|since| updated_at < since)
    }

    /// Between the backlog and the checkpoint lies what an earlier pass
    /// already processed.
    fn wants(&self, updated_at: DateTime<Utc>) -> bool {
        match (self.backlog, self.checkpoint) {
            (Some(backlog), Some(checkpoint)) => {
                updated_at >= checkpoint || backlog.covers(updated_at)
            }
            _ => !self.is_before(updated_at),
        }
    }

    /// Conversations are processed most recent first, so everything left over
    /// is no newer than the latest unprocessed or unlisted one.
    fn backlog_after(
        &self,
        unprocessed: &[RemoteConversation],
        truncated_at: Option<DateTime<Utc>>,
    ) -> Option<SyncBacklog> {
        let until = unprocessed
            .iter()
            .map(|c| c.updated_at)
            .chain(truncated_at)
            .max()?;
        Some(SyncBacklog {
            floor: self.since,
            until,
        })
    }
}

pub struct SyncEngine<'a> {
    pub pages: &'a dyn PageStore,
    pub contacts: &'a dyn ContactStore,
    pub source: &'a dyn ConversationSource,
    pub settings: &'a SyncSettings,
    pub offset: FixedOffset,
}

impl<'a> SyncEngine<'a> {
    pub fn from_state(state: &'a AppState) -> Self {
        Self {
            pages: state.pages.as_ref(),
            contacts: state.contacts.as_ref(),
            source: state.source.as_ref(),
            settings: &state.config.sync,
            offset: state.config.contact_offset,
        }
    }

    /// Ingests the page's conversations into contact records.
    ///
    /// With a stored checkpoint and no `force_full`, only conversations updated
    /// at or after the checkpoint are fetched, plus any backlog an earlier
    /// partial pass left behind. The checkpoint is moved to this pass's start
    /// time whether it completes or stops at the deadline; what it did not
    /// reach is recorded as the new backlog.
    pub async fn sync_page(
        &self,
        page_id: Uuid,
        force_full: bool,
        deadline: Deadline,
    ) -> Result<SyncSummary, AppError> {
        let started_at = Utc::now();
        let page = require_page(self.pages, page_id).await?;
        let credentials = page.credentials()?;

        let window = SyncWindow::for_page(&page, force_full);
        let listing = self
            .collect_conversations(&credentials, &window, &deadline)
            .await?;
        let restored_psids = self.restored_psids(&page, &listing.conversations).await?;

        info!(
            page_id = %page_id,
            conversations = listing.conversations.len(),
            incremental = window.is_incremental(),
            backlog = window.backlog.is_some(),
            restored = restored_psids.len(),
            "Sync started"
        );

        let mut summary = SyncSummary {
            synced: 0,
            failed: 0,
            partial: false,
            remaining: None,
            remaining_conversation_ids: Vec::new(),
            backlog: None,
            incremental: window.is_incremental(),
            restored: restored_psids.len(),
            restored_psids,
            started_at,
        };

        let mut runner = BatchRunner::new(listing.conversations, &self.settings.batch, deadline);
        let mut stop = StopReason::Completed;

        while runner.has_pending() {
            runner.pace().await;
            if runner.deadline_reached() {
                stop = StopReason::DeadlineReached;
                break;
            }

            let group = runner.take_group();
            let outcomes = join_all(
                group
                    .iter()
                    .map(|c| self.sync_conversation(&page, &credentials, c)),
            )
            .await;

            let mut synced_psids = Vec::new();
            for (conversation, outcome) in group.iter().zip(outcomes) {
                match outcome {
                    Ok(psid) => synced_psids.push(psid),
                    Err(reason) => {
                        warn!(
                            page_id = %page_id,
                            conversation_id = %conversation.id,
                            "Conversation sync failed: {reason}"
                        );
                        summary.failed += 1;
                    }
                }
            }
            summary.synced += synced_psids.len();
            self.contacts.clear_deleted(page_id, &synced_psids).await?;
        }

        let unprocessed = match stop {
            StopReason::DeadlineReached => runner.into_remaining(),
            _ => Vec::new(),
        };
        let backlog = window.backlog_after(&unprocessed, listing.truncated_at);
        if backlog.is_some() {
            summary.partial = true;
            summary.remaining = Some(unprocessed.len());
            summary.remaining_conversation_ids = unprocessed.into_iter().map(|c| c.id).collect();
            summary.backlog = backlog;
        }

        self.pages
            .record_sync_pass(page_id, started_at, backlog)
            .await?;

        info!(
            page_id = %page_id,
            synced = summary.synced,
            failed = summary.failed,
            partial = summary.partial,
            "Sync finished"
        );

        Ok(summary)
    }

    /// Pages through conversations, most recent first, stopping at the first
    /// one older than the window. When the deadline cuts the listing short,
    /// the oldest update time seen bounds everything not yet listed.
    async fn collect_conversations(
        &self,
        credentials: &PageCredentials,
        window: &SyncWindow,
        deadline: &Deadline,
    ) -> Result<Listing, AppError> {
        let mut listing = Listing::default();
        let mut oldest_seen: Option<DateTime<Utc>> = None;
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .source
                .list_conversations(credentials, self.settings.page_size, cursor.as_deref())
                .await?;

            let mut reached_older = false;
            for conversation in page.conversations {
                oldest_seen = Some(conversation.updated_at);
                if window.is_before(conversation.updated_at) {
                    reached_older = true;
                } else if window.wants(conversation.updated_at) {
                    listing.conversations.push(conversation);
                }
            }

            match page.next_cursor {
                Some(_) if reached_older => break,
                Some(_) if deadline.is_exceeded() => {
                    listing.truncated_at = Some(oldest_seen.unwrap_or_else(Utc::now));
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(listing)
    }

    /// Remote participants that are not stored locally but were removed by an
    /// explicit bulk delete.
    async fn restored_psids(
        &self,
        page: &Page,
        conversations: &[RemoteConversation],
    ) -> Result<Vec<String>, AppError> {
        let remote: HashSet<&str> = conversations
            .iter()
            .filter_map(|c| c.contact(&page.external_id))
            .map(|p| p.id.as_str())
            .collect();
        if remote.is_empty() {
            return Ok(Vec::new());
        }

        let known = self.contacts.known_psids(page.id).await?;
        let deleted = self.contacts.deleted_psids(page.id).await?;

        let mut restored: Vec<String> = remote
            .into_iter()
            .filter(|psid| !known.contains(*psid) && deleted.contains(*psid))
            .map(String::from)
            .collect();
        restored.sort();
        Ok(restored)
    }

    /// Upserts the contact of one conversation. Profile and history fetches
    /// are each raced against their own timeout and degrade to no data.
    async fn sync_conversation(
        &self,
        page: &Page,
        credentials: &PageCredentials,
        conversation: &RemoteConversation,
    ) -> Result<String, String> {
        let participant = conversation
            .contact(&page.external_id)
            .ok_or_else(|| "Conversation has no contact participant".to_string())?;
        let psid = participant.id.as_str();
        let token = credentials.access_token.as_str();

        let (profile, messages) = tokio::join!(
            with_timeout(
                self.settings.profile_timeout,
                self.source.get_profile(psid, token)
            ),
            with_timeout(
                self.settings.messages_timeout,
                self.source.list_messages(&conversation.id, token)
            ),
        );

        let profile = match profile {
            Some(Ok(profile)) => profile,
            Some(Err(err)) => {
                warn!(psid = %psid, "Profile fetch failed: {err}");
                Profile::default()
            }
            None => {
                warn!(psid = %psid, "Profile fetch timed out");
                Profile::default()
            }
        };
        let messages = match messages {
            Some(Ok(messages)) => Some(messages),
            Some(Err(err)) => {
                warn!(psid = %psid, "Message history fetch failed: {err}");
                None
            }
            None => {
                warn!(psid = %psid, "Message history fetch timed out");
                None
            }
        };

        let upsert = ContactUpsert {
            page_id: page.id,
            psid: psid.to_string(),
            name: profile.name.or_else(|| participant.name.clone()),
            profile_pic: profile.picture_url,
            last_interaction_at: conversation.updated_at,
            history: build_interaction_summary(
                messages.as_deref(),
                psid,
                conversation.updated_at,
                &self.offset,
                &self.settings.tiers,
            ),
        };

        self.contacts
            .upsert_contact(&upsert)
            .await
            .map_err(|e| e.to_string())?;
        Ok(upsert.psid)
    }
}
