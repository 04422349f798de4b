//! Loop Scheduler: daily recurring campaigns driven by short periodic ticks.
//!
//! A tick is stateless. Each one reads which recipients are due from persisted
//! timestamps, sends to a bounded slice of them and writes the next day's
//! schedule back. Ticks arrive from an external cron caller and, optionally,
//! from an in-process interval.

mod control;
pub mod handlers;
mod schedule;
mod tick;

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::state::AppState;

pub use control::{set_loop_status, LoopStatusChange};
pub use tick::{LoopScheduler, TickSummary};

/// Runs a tick every `every` until the process exits. Missed ticks are skipped
/// rather than bunched up behind a slow one.
pub fn spawn_ticker(state: AppState, every: Duration) -> JoinHandle<()> {
    info!("Loop ticker started (every {}s)", every.as_secs());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let result = match LoopScheduler::from_state(&state) {
                Ok(scheduler) => scheduler.run_tick().await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                error!("Loop tick failed: {err}");
            }
        }
    })
}
