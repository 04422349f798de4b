//! Deadline-aware grouped work loop shared by the dispatcher, the sync engine
//! and the loop scheduler.
//!
//! Work is taken in fixed-size groups. Before each group the caller paces
//! (inter-group delay), checks the deadline and polls whatever external stop
//! signal applies; the items of a group run concurrently and the whole group is
//! awaited before the next one starts. Anything not yet taken stays queued and
//! can be handed back to the caller as the resume set of a partial result.
//!
//! Deadlines are wall-clock comparisons against a start instant. Nothing is
//! forcibly aborted; slow individual calls are bounded by `with_timeout`.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::BatchSettings;

/// A wall-clock budget measured from the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn starting_now(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_exceeded(&self) -> bool {
        self.elapsed() >= self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }
}

/// Why a grouped pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    DeadlineReached,
    Cancelled,
}

/// Queue of items consumed group by group under a deadline.
pub struct BatchRunner<T> {
    pending: VecDeque<T>,
    group_size: usize,
    group_delay: Duration,
    deadline: Deadline,
    groups_taken: usize,
}

impl<T> BatchRunner<T> {
    pub fn new(items: Vec<T>, settings: &BatchSettings, deadline: Deadline) -> Self {
        Self {
            pending: items.into(),
            group_size: settings.group_size.max(1),
            group_delay: settings.group_delay,
            deadline,
            groups_taken: 0,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn groups_taken(&self) -> usize {
        self.groups_taken
    }

    /// Sleeps the inter-group delay. No-op before the first group.
    pub async fn pace(&self) {
        if self.groups_taken > 0 && !self.group_delay.is_zero() {
            tokio::time::sleep(self.group_delay).await;
        }
    }

    pub fn deadline_reached(&self) -> bool {
        self.deadline.is_exceeded()
    }

    /// Removes and returns the next group of at most `group_size` items.
    pub fn take_group(&mut self) -> Vec<T> {
        let n = self.group_size.min(self.pending.len());
        self.groups_taken += 1;
        self.pending.drain(..n).collect()
    }

    /// Items never taken; the resume set after a partial pass.
    pub fn into_remaining(self) -> Vec<T> {
        self.pending.into()
    }
}

/// Races `fut` against `limit`. `None` means the call did not finish in time.
pub async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}
