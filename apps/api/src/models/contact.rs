use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::UnknownVariant;

/// Strength of a best-hour inference. Ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    None,
    Inferred,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub const ALL: [Confidence; 5] = [
        Confidence::None,
        Confidence::Inferred,
        Confidence::Low,
        Confidence::Medium,
        Confidence::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Inferred => "inferred",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl FromStr for Confidence {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Confidence::None),
            "inferred" => Ok(Confidence::Inferred),
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(UnknownVariant::new("confidence", other)),
        }
    }
}

/// One bucket of an hour-of-day histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u8,
    pub count: u32,
}

#[derive(Debug, Clone, FromRow)]
pub struct ContactRow {
    pub id: Uuid,
    pub page_id: Uuid,
    pub psid: String,
    pub name: Option<String>,
    pub profile_pic: Option<String>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub interaction_count: i32,
    pub best_contact_hour: Option<i16>,
    pub best_contact_confidence: String,
    pub top_hours: Json<Vec<HourCount>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub id: Uuid,
    pub page_id: Uuid,
    pub psid: String,
    pub name: Option<String>,
    pub profile_pic: Option<String>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub interaction_count: u32,
    pub best_contact_hour: Option<u8>,
    pub best_contact_confidence: Confidence,
    pub top_hours: Vec<HourCount>,
}

impl TryFrom<ContactRow> for Contact {
    type Error = UnknownVariant;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        Ok(Contact {
            id: row.id,
            page_id: row.page_id,
            psid: row.psid,
            name: row.name,
            profile_pic: row.profile_pic,
            last_interaction_at: row.last_interaction_at,
            interaction_count: u32::try_from(row.interaction_count).unwrap_or(0),
            best_contact_hour: row
                .best_contact_hour
                .and_then(|h| u8::try_from(h).ok())
                .filter(|h| *h < 24),
            best_contact_confidence: row.best_contact_confidence.parse()?,
            top_hours: row.top_hours.0,
        })
    }
}

/// Hour-of-day statistics derived from one contact's message history.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionSummary {
    pub interaction_count: u32,
    pub best_contact_hour: Option<u8>,
    pub best_contact_confidence: Confidence,
    pub top_hours: Vec<HourCount>,
}

/// Everything a sync pass learns about one conversation participant.
/// Upserted by `(page_id, psid)`; `None` name/picture keeps the stored value,
/// and `None` history keeps the stored hour data.
#[derive(Debug, Clone)]
pub struct ContactUpsert {
    pub page_id: Uuid,
    pub psid: String,
    pub name: Option<String>,
    pub profile_pic: Option<String>,
    pub last_interaction_at: DateTime<Utc>,
    pub history: Option<InteractionSummary>,
}
