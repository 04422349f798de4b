use chrono::{DateTime, FixedOffset, Utc};

use crate::best_time::{local_hour, HourHistogram, VolumeTiers};
use crate::graph::RemoteMessage;
use crate::models::contact::{Confidence, HourCount, InteractionSummary};

/// Number of hour buckets kept on the contact record.
pub const TOP_HOURS: usize = 5;

/// Hour statistics for one contact from its conversation's messages.
///
/// `None` messages means the history could not be fetched: no hour data is
/// produced and whatever is stored stays. A history without any message from
/// the contact falls back to the conversation's last update hour as a single
/// `inferred` interaction.
pub fn build_interaction_summary(
    messages: Option<&[RemoteMessage]>,
    contact_psid: &str,
    conversation_updated_at: DateTime<Utc>,
    offset: &FixedOffset,
    tiers: &VolumeTiers,
) -> Option<InteractionSummary> {
    let messages = messages?;

    let histogram = HourHistogram::from_timestamps(
        messages
            .iter()
            .filter(|m| m.from_id == contact_psid)
            .map(|m| &m.created_at),
        offset,
    );

    if histogram.is_empty() {
        let hour = local_hour(&conversation_updated_at, offset);
        return Some(InteractionSummary {
            interaction_count: 1,
            best_contact_hour: Some(hour),
            best_contact_confidence: Confidence::Inferred,
            top_hours: vec![HourCount { hour, count: 1 }],
        });
    }

    let interaction_count = histogram.total();
    Some(InteractionSummary {
        interaction_count,
        best_contact_hour: histogram.mode(),
        best_contact_confidence: tiers.confidence_for(interaction_count),
        top_hours: histogram.top(TOP_HOURS),
    })
}
