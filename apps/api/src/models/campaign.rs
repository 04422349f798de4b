use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(UnknownVariant::new("campaign status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Active,
    Paused,
    Stopped,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Active => "active",
            LoopStatus::Paused => "paused",
            LoopStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for LoopStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LoopStatus::Active),
            "paused" => Ok(LoopStatus::Paused),
            "stopped" => Ok(LoopStatus::Stopped),
            other => Err(UnknownVariant::new("loop status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
        }
    }
}

impl FromStr for RecipientStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            other => Err(UnknownVariant::new("recipient status", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CampaignRow {
    pub id: Uuid,
    pub page_id: Uuid,
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub is_loop: bool,
    pub loop_status: Option<String>,
    pub ai_prompt: Option<String>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: Uuid,
    pub page_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    /// Static body; always `None` for loop campaigns, whose text is generated per contact.
    pub message: Option<String>,
    pub is_loop: bool,
    pub loop_status: Option<LoopStatus>,
    pub ai_prompt: Option<String>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = UnknownVariant;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        Ok(Campaign {
            id: row.id,
            page_id: row.page_id,
            name: row.name,
            status: row.status.parse()?,
            message: row.message,
            is_loop: row.is_loop,
            loop_status: row.loop_status.as_deref().map(str::parse).transpose()?,
            ai_prompt: row.ai_prompt,
            total_recipients: row.total_recipients,
            sent_count: row.sent_count,
            last_run_at: row.last_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// The contact side of a recipient row. Absent when the contact was deleted
/// after the recipient was added to the campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientContact {
    pub contact_id: Uuid,
    pub psid: Option<String>,
    pub name: Option<String>,
    pub best_contact_hour: Option<u8>,
}

impl RecipientContact {
    /// First token of the display name, used to personalize generated text.
    pub fn first_name(&self) -> &str {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or("there")
    }
}

/// A `pending` recipient selected for a one-shot dispatch pass.
#[derive(Debug, Clone)]
pub struct PendingRecipient {
    pub id: Uuid,
    pub contact: Option<RecipientContact>,
}

/// A recipient of a loop campaign together with its schedule bookkeeping.
#[derive(Debug, Clone)]
pub struct LoopRecipient {
    pub id: Uuid,
    pub status: RecipientStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub message_sent_count: i32,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub contact: Option<RecipientContact>,
}

impl LoopRecipient {
    /// Due when still `pending` and either schedule timestamp has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RecipientStatus::Pending
            && [self.scheduled_at, self.next_scheduled_at]
                .iter()
                .flatten()
                .any(|at| *at <= now)
    }
}

/// Flat shape returned by recipient/contact joins. Converted to the nested
/// recipient types in one place so call sites never branch on join shape.
#[derive(Debug, Clone, FromRow)]
pub struct RecipientJoinRow {
    pub id: Uuid,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub message_sent_count: i32,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub contact_id: Option<Uuid>,
    pub psid: Option<String>,
    pub contact_name: Option<String>,
    pub best_contact_hour: Option<i16>,
}

impl RecipientJoinRow {
    fn contact(&self) -> Option<RecipientContact> {
        self.contact_id.map(|contact_id| RecipientContact {
            contact_id,
            psid: self.psid.clone().filter(|p| !p.is_empty()),
            name: self.contact_name.clone(),
            best_contact_hour: self
                .best_contact_hour
                .and_then(|h| u8::try_from(h).ok())
                .filter(|h| *h < 24),
        })
    }
}

impl From<RecipientJoinRow> for PendingRecipient {
    fn from(row: RecipientJoinRow) -> Self {
        PendingRecipient {
            contact: row.contact(),
            id: row.id,
        }
    }
}

impl TryFrom<RecipientJoinRow> for LoopRecipient {
    type Error = UnknownVariant;

    fn try_from(row: RecipientJoinRow) -> Result<Self, Self::Error> {
        Ok(LoopRecipient {
            contact: row.contact(),
            id: row.id,
            status: row.status.parse()?,
            scheduled_at: row.scheduled_at,
            next_scheduled_at: row.next_scheduled_at,
            message_sent_count: row.message_sent_count,
            last_contacted_at: row.last_contacted_at,
        })
    }
}
