//! Tiered best-hour inference.
//!
//! Preference order:
//! 1. enough own interactions (`high_min`) → own mode, `high`
//! 2. some own interactions (`medium_min`) → own mode, `medium`
//! 3. a single known hour → mode of neighbors whose anchor hour lies within
//!    `±neighbor_window` of it, `inferred`
//! 4. otherwise → page-wide mode, `low`; `none` if the page has no data either

use serde::{Deserialize, Serialize};

use super::histogram::{hour_distance, HourHistogram};
use crate::models::contact::Confidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorParams {
    pub neighbor_window: u8,
    pub high_min: u32,
    pub medium_min: u32,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            neighbor_window: 2,
            high_min: 5,
            medium_min: 2,
        }
    }
}

/// Another contact on the same page, seen through its best/observed hour.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub anchor_hour: u8,
    pub histogram: HourHistogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    Own,
    Neighbors,
    PageAverage,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BestTime {
    pub hour: Option<u8>,
    pub confidence: Confidence,
    pub source: EstimateSource,
}

impl BestTime {
    fn unknown() -> Self {
        Self {
            hour: None,
            confidence: Confidence::None,
            source: EstimateSource::Unknown,
        }
    }
}

pub fn estimate_best_time(
    own: &HourHistogram,
    own_interactions: u32,
    neighbors: &[Neighbor],
    page: &HourHistogram,
    params: &EstimatorParams,
) -> BestTime {
    if own_interactions > 0 {
        if let Some(own_mode) = own.mode() {
            if own_interactions >= params.high_min {
                return BestTime {
                    hour: Some(own_mode),
                    confidence: Confidence::High,
                    source: EstimateSource::Own,
                };
            }
            if own_interactions >= params.medium_min {
                return BestTime {
                    hour: Some(own_mode),
                    confidence: Confidence::Medium,
                    source: EstimateSource::Own,
                };
            }
            if let Some(hour) = neighbor_mode(own_mode, neighbors, params.neighbor_window) {
                return BestTime {
                    hour: Some(hour),
                    confidence: Confidence::Inferred,
                    source: EstimateSource::Neighbors,
                };
            }
        }
    }

    match page.mode() {
        Some(hour) => BestTime {
            hour: Some(hour),
            confidence: Confidence::Low,
            source: EstimateSource::PageAverage,
        },
        None => BestTime::unknown(),
    }
}

/// Mode of the combined full histograms of neighbors anchored near `known_hour`.
fn neighbor_mode(known_hour: u8, neighbors: &[Neighbor], window: u8) -> Option<u8> {
    let mut combined = HourHistogram::new();
    for n in neighbors
        .iter()
        .filter(|n| hour_distance(n.anchor_hour, known_hour) <= window)
    {
        combined.merge(&n.histogram);
    }
    combined.mode()
}
