use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::schedule::next_occurrence;
use crate::errors::AppError;
use crate::models::campaign::{CampaignStatus, LoopStatus};
use crate::store::{require_campaign, CampaignStore};

#[derive(Debug, Serialize)]
pub struct LoopStatusChange {
    pub campaign_id: Uuid,
    pub loop_status: LoopStatus,
    /// Recipients that received their first schedule on activation.
    pub seeded: usize,
}

/// Changes a loop campaign's `loop_status`.
///
/// Activating seeds every recipient that has never been scheduled with the next
/// occurrence of its contact's best hour, so it becomes due on a later tick.
pub async fn set_loop_status(
    campaigns: &dyn CampaignStore,
    campaign_id: Uuid,
    status: LoopStatus,
    default_hour: u8,
    offset: &FixedOffset,
    now: DateTime<Utc>,
) -> Result<LoopStatusChange, AppError> {
    let campaign = require_campaign(campaigns, campaign_id).await?;
    if !campaign.is_loop {
        return Err(AppError::Validation(format!(
            "Campaign {campaign_id} is not a loop campaign"
        )));
    }
    if campaign.status == CampaignStatus::Cancelled {
        return Err(AppError::Conflict(format!(
            "Campaign {campaign_id} was cancelled"
        )));
    }
    let has_prompt = campaign
        .ai_prompt
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    if status == LoopStatus::Active && !has_prompt {
        return Err(AppError::Validation(
            "A loop campaign needs an AI prompt before it can be activated".to_string(),
        ));
    }

    campaigns.set_loop_status(campaign_id, status).await?;

    let mut seeded = 0;
    if status == LoopStatus::Active {
        for recipient in campaigns.unscheduled_loop_recipients(campaign_id).await? {
            let hour = recipient
                .contact
                .as_ref()
                .and_then(|c| c.best_contact_hour)
                .unwrap_or(default_hour);
            campaigns
                .schedule_recipient(recipient.id, next_occurrence(now, hour, offset))
                .await?;
            seeded += 1;
        }
    }

    info!(
        campaign_id = %campaign_id,
        loop_status = status.as_str(),
        seeded,
        "Loop status changed"
    );

    Ok(LoopStatusChange {
        campaign_id,
        loop_status: status,
        seeded,
    })
}
