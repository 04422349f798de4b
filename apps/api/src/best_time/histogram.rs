use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::contact::{Confidence, HourCount};

pub const HOURS_PER_DAY: u8 = 24;

/// Interaction counts bucketed by local hour of day (0–23).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HourHistogram([u32; HOURS_PER_DAY as usize]);

impl HourHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a histogram from `(hour, count)` pairs; out-of-range hours are ignored.
    pub fn from_counts(counts: &[HourCount]) -> Self {
        let mut histogram = Self::new();
        for c in counts {
            histogram.add(c.hour, c.count);
        }
        histogram
    }

    /// Buckets each timestamp by its hour at `offset`.
    pub fn from_timestamps<'a, I>(timestamps: I, offset: &FixedOffset) -> Self
    where
        I: IntoIterator<Item = &'a DateTime<Utc>>,
    {
        let mut histogram = Self::new();
        for ts in timestamps {
            histogram.record(local_hour(ts, offset));
        }
        histogram
    }

    pub fn record(&mut self, hour: u8) {
        self.add(hour, 1);
    }

    pub fn add(&mut self, hour: u8, count: u32) {
        if let Some(bucket) = self.0.get_mut(hour as usize) {
            *bucket = bucket.saturating_add(count);
        }
    }

    pub fn merge(&mut self, other: &HourHistogram) {
        for (hour, count) in other.iter() {
            self.add(hour, count);
        }
    }

    pub fn count(&self, hour: u8) -> u32 {
        self.0.get(hour as usize).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.iter().fold(0u32, |acc, c| acc.saturating_add(*c))
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// `(hour, count)` in ascending hour order, including empty buckets.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.0.iter().enumerate().map(|(h, c)| (h as u8, *c))
    }

    /// The hour with the highest count. Ties go to the earliest hour, so the
    /// result is deterministic. `None` when the histogram is empty.
    pub fn mode(&self) -> Option<u8> {
        let mut best: Option<(u8, u32)> = None;
        for (hour, count) in self.iter() {
            if count == 0 {
                continue;
            }
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((hour, count)),
            }
        }
        best.map(|(hour, _)| hour)
    }

    /// Up to `n` non-empty buckets, highest count first, earlier hour first on ties.
    pub fn top(&self, n: usize) -> Vec<HourCount> {
        let mut buckets: Vec<HourCount> = self
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(hour, count)| HourCount { hour, count })
            .collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then(a.hour.cmp(&b.hour)));
        buckets.truncate(n);
        buckets
    }
}

pub fn local_hour(ts: &DateTime<Utc>, offset: &FixedOffset) -> u8 {
    ts.with_timezone(offset).hour() as u8
}

/// Distance between two hours on the 24-hour clock, wrapping across midnight.
pub fn hour_distance(a: u8, b: u8) -> u8 {
    let diff = (a as i16 - b as i16).rem_euclid(HOURS_PER_DAY as i16) as u8;
    diff.min(HOURS_PER_DAY - diff)
}

/// Confidence assigned by the sync engine from raw message volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTiers {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for VolumeTiers {
    fn default() -> Self {
        Self {
            high: 10,
            medium: 5,
            low: 2,
        }
    }
}

impl VolumeTiers {
    pub fn confidence_for(&self, messages: u32) -> Confidence {
        if messages == 0 {
            Confidence::None
        } else if messages >= self.high {
            Confidence::High
        } else if messages >= self.medium {
            Confidence::Medium
        } else if messages >= self.low {
            Confidence::Low
        } else {
            Confidence::Inferred
        }
    }
}
