use std::time::Duration;

use chrono::{FixedOffset, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::schedule::next_daily_slot;
use crate::batch::{with_timeout, BatchRunner, Deadline};
use crate::config::{BatchSettings, LoopSettings};
use crate::errors::AppError;
use crate::graph::{GraphError, MessageGateway, PageCredentials};
use crate::llm_client::prompts::fallback_message;
use crate::llm_client::TextGenerator;
use crate::models::campaign::{Campaign, LoopRecipient};
use crate::state::AppState;
use crate::store::{require_page, CampaignStore, PageStore};

/// Aggregate counters of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    pub campaigns_processed: usize,
    pub campaigns_deferred: usize,
    pub due: usize,
    pub sent: usize,
    /// Failed sends that will be retried on the next due cycle.
    pub retried: usize,
    /// Failed sends past the retry ceiling; those recipients are now `failed`.
    pub failed: usize,
    pub generated: usize,
    pub fallbacks: usize,
    pub deadline_reached: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reconnect_required: Vec<Uuid>,
}

enum LoopOutcome {
    Sent { generated: bool },
    Failed(String),
    CredentialRejected(GraphError),
}

pub struct LoopScheduler<'a> {
    pub campaigns: &'a dyn CampaignStore,
    pub pages: &'a dyn PageStore,
    pub gateway: &'a dyn MessageGateway,
    pub generator: &'a dyn TextGenerator,
    pub settings: &'a LoopSettings,
    pub offset: FixedOffset,
}

impl<'a> LoopScheduler<'a> {
    /// Refuses to build without a text generator.
    pub fn from_state(state: &'a AppState) -> Result<Self, AppError> {
        let generator = state.generator.as_deref().ok_or_else(|| {
            AppError::Configuration("ANTHROPIC_API_KEY is not set; loop ticks are disabled".to_string())
        })?;
        Ok(Self {
            campaigns: state.campaigns.as_ref(),
            pages: state.pages.as_ref(),
            gateway: state.gateway.as_ref(),
            generator,
            settings: &state.config.loop_settings,
            offset: state.config.contact_offset,
        })
    }

    /// Processes a bounded slice of due loop work.
    ///
    /// Due-ness is read fresh from the store; nothing is carried between ticks.
    /// Campaigns not reached before the tick budget runs out are deferred to
    /// the next tick, which picks the least recently run campaigns first.
    pub async fn run_tick(&self) -> Result<TickSummary, AppError> {
        let deadline = Deadline::starting_now(self.settings.tick_budget);
        let mut summary = TickSummary::default();

        let campaigns = self
            .campaigns
            .active_loop_campaigns(self.settings.max_campaigns_per_tick)
            .await?;

        for (index, campaign) in campaigns.iter().enumerate() {
            if deadline.is_exceeded() {
                summary.deadline_reached = true;
                summary.campaigns_deferred = campaigns.len() - index;
                break;
            }

            match self.process_campaign(campaign, &deadline, &mut summary).await {
                Ok(()) => {}
                Err(AppError::ReconnectRequired(reason)) => {
                    warn!(
                        campaign_id = %campaign.id,
                        page_id = %campaign.page_id,
                        "Loop campaign skipped, page needs reconnecting: {reason}"
                    );
                    summary.reconnect_required.push(campaign.id);
                }
                Err(err) => return Err(err),
            }

            self.campaigns
                .mark_campaign_run(campaign.id, Utc::now())
                .await?;
            summary.campaigns_processed += 1;
        }

        info!(
            campaigns = summary.campaigns_processed,
            due = summary.due,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            deadline_reached = summary.deadline_reached,
            "Loop tick finished"
        );

        Ok(summary)
    }

    async fn process_campaign(
        &self,
        campaign: &Campaign,
        deadline: &Deadline,
        summary: &mut TickSummary,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let due = self
            .campaigns
            .due_loop_recipients(campaign.id, now, self.settings.max_recipients_per_campaign)
            .await?;
        if due.is_empty() {
            return Ok(());
        }
        summary.due += due.len();

        let page = require_page(self.pages, campaign.page_id).await?;
        let credentials = page.credentials()?;
        let prompt = campaign
            .ai_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let grouping = BatchSettings {
            group_size: self.settings.group_size,
            group_delay: Duration::ZERO,
        };
        let mut runner = BatchRunner::new(due, &grouping, *deadline);

        while runner.has_pending() {
            if runner.deadline_reached() {
                summary.deadline_reached = true;
                break;
            }

            let group = runner.take_group();
            let outcomes = join_all(
                group
                    .iter()
                    .map(|r| self.contact_recipient(prompt, &credentials, r, deadline)),
            )
            .await;

            let mut group_sent = 0;
            let mut rejected: Option<GraphError> = None;
            for (recipient, outcome) in group.iter().zip(outcomes) {
                let next_at = next_daily_slot(now, self.hour_for(recipient), &self.offset);
                match outcome {
                    LoopOutcome::Sent { generated } => {
                        self.campaigns
                            .record_loop_success(recipient.id, Utc::now(), next_at)
                            .await?;
                        group_sent += 1;
                        if generated {
                            summary.generated += 1;
                        } else {
                            summary.fallbacks += 1;
                        }
                    }
                    LoopOutcome::Failed(reason) => {
                        let give_up = recipient.message_sent_count >= self.settings.retry_ceiling;
                        warn!(
                            campaign_id = %campaign.id,
                            recipient_id = %recipient.id,
                            give_up = give_up,
                            "Loop send failed: {reason}"
                        );
                        self.campaigns
                            .record_loop_failure(recipient.id, &reason, next_at, give_up)
                            .await?;
                        if give_up {
                            summary.failed += 1;
                        } else {
                            summary.retried += 1;
                        }
                    }
                    LoopOutcome::CredentialRejected(err) => {
                        rejected.get_or_insert(err);
                    }
                }
            }

            if group_sent > 0 {
                self.campaigns
                    .add_sent_count(campaign.id, group_sent as i32)
                    .await?;
            }
            summary.sent += group_sent;

            if let Some(err) = rejected {
                return Err(err.into());
            }
        }

        Ok(())
    }

    fn hour_for(&self, recipient: &LoopRecipient) -> u8 {
        recipient
            .contact
            .as_ref()
            .and_then(|c| c.best_contact_hour)
            .unwrap_or(self.settings.default_hour)
    }

    async fn contact_recipient(
        &self,
        prompt: Option<&str>,
        credentials: &PageCredentials,
        recipient: &LoopRecipient,
        deadline: &Deadline,
    ) -> LoopOutcome {
        let Some(contact) = recipient.contact.as_ref() else {
            return LoopOutcome::Failed("Recipient contact no longer exists".to_string());
        };
        let Some(psid) = contact.psid.as_deref() else {
            return LoopOutcome::Failed("Recipient has no messenger id".to_string());
        };

        let (text, generated) = self.compose(prompt, contact.first_name(), deadline).await;

        // never wait past the tick budget
        let limit = self.settings.send_timeout.min(deadline.remaining());
        match with_timeout(limit, self.gateway.send_text(credentials, psid, &text)).await {
            Some(Ok(_)) => LoopOutcome::Sent { generated },
            Some(Err(err)) if err.is_credential_fault() => LoopOutcome::CredentialRejected(err),
            Some(Err(err)) => LoopOutcome::Failed(err.to_string()),
            None => LoopOutcome::Failed(format!("Send timed out after {}ms", limit.as_millis())),
        }
    }

    /// Generated text, or the fallback greeting when generation fails, times
    /// out or the campaign has no prompt.
    async fn compose(
        &self,
        prompt: Option<&str>,
        first_name: &str,
        deadline: &Deadline,
    ) -> (String, bool) {
        let Some(prompt) = prompt else {
            return (fallback_message(first_name), false);
        };

        match with_timeout(
            self.settings.generation_timeout.min(deadline.remaining()),
            self.generator.generate(prompt, first_name),
        )
        .await
        {
            Some(Ok(text)) => (text, true),
            Some(Err(err)) => {
                warn!("Loop message generation failed, using fallback: {err}");
                (fallback_message(first_name), false)
            }
            None => {
                warn!("Loop message generation timed out, using fallback");
                (fallback_message(first_name), false)
            }
        }
    }
}
