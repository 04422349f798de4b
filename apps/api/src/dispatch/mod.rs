//! Batch Dispatcher: one-shot campaign sends under a deadline with
//! cooperative cancellation.

mod dispatcher;
pub mod handlers;

pub use dispatcher::{cancel_campaign, DispatchSummary, Dispatcher};
