use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{with_timeout, BatchRunner, Deadline, StopReason};
use crate::config::DispatchSettings;
use crate::errors::AppError;
use crate::graph::{GraphError, MessageGateway, PageCredentials};
use crate::models::campaign::{Campaign, CampaignStatus, PendingRecipient};
use crate::state::AppState;
use crate::store::{require_campaign, require_page, CampaignStore, PageStore};

/// Outcome of one dispatch invocation. `partial` and `cancelled` are ordinary
/// outcomes; the unsent recipients stay `pending` for the next invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub partial: bool,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remaining_recipient_ids: Vec<Uuid>,
}

enum Delivery {
    Sent,
    Failed(String),
    CredentialRejected(GraphError),
}

pub struct Dispatcher<'a> {
    pub campaigns: &'a dyn CampaignStore,
    pub pages: &'a dyn PageStore,
    pub gateway: &'a dyn MessageGateway,
    pub settings: &'a DispatchSettings,
}

impl<'a> Dispatcher<'a> {
    pub fn from_state(state: &'a AppState) -> Self {
        Self {
            campaigns: state.campaigns.as_ref(),
            pages: state.pages.as_ref(),
            gateway: state.gateway.as_ref(),
            settings: &state.config.dispatch,
        }
    }

    /// Sends the campaign's message to every `pending` recipient.
    ///
    /// Safe to call again after a partial result: only `pending` recipients
    /// are ever selected, so already-sent recipients are never sent twice.
    pub async fn send_campaign(
        &self,
        campaign_id: Uuid,
        deadline: Deadline,
    ) -> Result<DispatchSummary, AppError> {
        let campaign = require_campaign(self.campaigns, campaign_id).await?;
        let message = sendable_message(&campaign)?;

        let page = require_page(self.pages, campaign.page_id).await?;
        let credentials = page.credentials()?;

        let total = self.campaigns.count_recipients(campaign_id).await?;
        let total = i32::try_from(total).unwrap_or(i32::MAX);
        if !self.campaigns.begin_sending(campaign_id, total).await? {
            return Err(AppError::Conflict(format!(
                "Campaign {campaign_id} can no longer be sent"
            )));
        }

        let pending = self.campaigns.pending_recipients(campaign_id).await?;
        if pending.is_empty() {
            self.campaigns
                .set_campaign_status(campaign_id, CampaignStatus::Completed)
                .await?;
            info!(campaign_id = %campaign_id, "No pending recipients, campaign completed");
            return Ok(DispatchSummary::default());
        }

        info!(
            campaign_id = %campaign_id,
            pending = pending.len(),
            total_recipients = total,
            "Dispatch started"
        );

        let mut runner = BatchRunner::new(pending, &self.settings.batch, deadline);
        let mut summary = DispatchSummary::default();
        let mut stop = StopReason::Completed;

        while runner.has_pending() {
            runner.pace().await;

            if runner.deadline_reached() {
                stop = StopReason::DeadlineReached;
                break;
            }
            if self.campaigns.campaign_status(campaign_id).await? == Some(CampaignStatus::Cancelled)
            {
                stop = StopReason::Cancelled;
                break;
            }

            let group = runner.take_group();
            let limit = self.settings.send_timeout;
            let outcomes = join_all(
                group
                    .iter()
                    .map(|r| deliver(self.gateway, &credentials, r, &message, limit)),
            )
            .await;

            let mut group_sent = 0;
            let mut rejected: Option<GraphError> = None;
            for (recipient, outcome) in group.iter().zip(outcomes) {
                match outcome {
                    Delivery::Sent => {
                        self.campaigns
                            .mark_recipient_sent(recipient.id, Utc::now())
                            .await?;
                        group_sent += 1;
                    }
                    Delivery::Failed(reason) => {
                        warn!(
                            campaign_id = %campaign_id,
                            recipient_id = %recipient.id,
                            "Send failed: {reason}"
                        );
                        self.campaigns
                            .mark_recipient_failed(recipient.id, &reason)
                            .await?;
                        summary.failed += 1;
                    }
                    // left pending; the whole pass stops after this group
                    Delivery::CredentialRejected(err) => {
                        rejected.get_or_insert(err);
                    }
                }
            }

            if group_sent > 0 {
                self.campaigns
                    .add_sent_count(campaign_id, group_sent as i32)
                    .await?;
            }
            summary.sent += group_sent;

            if let Some(err) = rejected {
                warn!(
                    campaign_id = %campaign_id,
                    sent = summary.sent,
                    failed = summary.failed,
                    "Dispatch stopped, page credentials rejected"
                );
                return Err(err.into());
            }
        }

        match stop {
            StopReason::Completed => {
                self.campaigns
                    .set_campaign_status(campaign_id, CampaignStatus::Completed)
                    .await?;
                info!(
                    campaign_id = %campaign_id,
                    sent = summary.sent,
                    failed = summary.failed,
                    "Dispatch completed"
                );
            }
            StopReason::DeadlineReached => {
                let remaining = runner.into_remaining();
                summary.partial = true;
                summary.remaining = Some(remaining.len());
                summary.remaining_recipient_ids = remaining.iter().map(|r| r.id).collect();
                info!(
                    campaign_id = %campaign_id,
                    sent = summary.sent,
                    failed = summary.failed,
                    remaining = remaining.len(),
                    "Dispatch deadline reached, returning partial result"
                );
            }
            StopReason::Cancelled => {
                let remaining = runner.pending_len();
                summary.cancelled = true;
                summary.remaining = Some(remaining);
                info!(
                    campaign_id = %campaign_id,
                    sent = summary.sent,
                    remaining,
                    "Dispatch cancelled"
                );
            }
        }

        Ok(summary)
    }
}

/// The static body of a one-shot campaign that is allowed to be sent.
fn sendable_message(campaign: &Campaign) -> Result<String, AppError> {
    if campaign.is_loop {
        return Err(AppError::Validation(
            "Loop campaigns are sent by the loop scheduler".to_string(),
        ));
    }
    match campaign.status {
        CampaignStatus::Completed => {
            return Err(AppError::Conflict(format!(
                "Campaign {} has already completed",
                campaign.id
            )))
        }
        CampaignStatus::Cancelled => {
            return Err(AppError::Conflict(format!(
                "Campaign {} was cancelled",
                campaign.id
            )))
        }
        CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Sending => {}
    }

    campaign
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::Validation("Campaign has no message body".to_string()))
}

async fn deliver(
    gateway: &dyn MessageGateway,
    credentials: &PageCredentials,
    recipient: &PendingRecipient,
    text: &str,
    limit: Duration,
) -> Delivery {
    let Some(psid) = recipient.contact.as_ref().and_then(|c| c.psid.as_deref()) else {
        return Delivery::Failed("Recipient has no messenger id".to_string());
    };

    match with_timeout(limit, gateway.send_text(credentials, psid, text)).await {
        Some(Ok(_)) => Delivery::Sent,
        Some(Err(err)) if err.is_credential_fault() => Delivery::CredentialRejected(err),
        Some(Err(err)) => Delivery::Failed(err.to_string()),
        None => Delivery::Failed(format!("Send timed out after {}ms", limit.as_millis())),
    }
}

/// Flips a not-yet-finished campaign to `cancelled`. A running dispatch notices
/// at its next group boundary.
pub async fn cancel_campaign(
    campaigns: &dyn CampaignStore,
    campaign_id: Uuid,
) -> Result<Campaign, AppError> {
    let campaign = require_campaign(campaigns, campaign_id).await?;
    if !campaigns.cancel_campaign(campaign_id).await? {
        return Err(AppError::Conflict(format!(
            "Campaign {campaign_id} is {} and cannot be cancelled",
            campaign.status.as_str()
        )));
    }
    info!(campaign_id = %campaign_id, "Campaign cancelled");

    Ok(Campaign {
        status: CampaignStatus::Cancelled,
        ..campaign
    })
}
