pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::best_time::handlers as best_time;
use crate::dispatch::handlers as dispatch;
use crate::loop_scheduler::handlers as loops;
use crate::state::AppState;
use crate::sync::handlers as sync;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Campaigns
        .route(
            "/api/v1/campaigns/:id/send",
            post(dispatch::handle_send_campaign),
        )
        .route(
            "/api/v1/campaigns/:id/cancel",
            post(dispatch::handle_cancel_campaign),
        )
        .route(
            "/api/v1/campaigns/:id/loop",
            patch(loops::handle_set_loop_status),
        )
        // Pages
        .route("/api/v1/pages/:id/sync", post(sync::handle_sync_page))
        .route(
            "/api/v1/pages/:id/contacts/delete",
            post(sync::handle_delete_contacts),
        )
        .route(
            "/api/v1/pages/:id/best-time",
            get(best_time::handle_page_best_time),
        )
        .route(
            "/api/v1/pages/:id/best-time/recompute",
            post(best_time::handle_recompute_best_time),
        )
        .route(
            "/api/v1/pages/:id/contacts/:contact_id/best-time",
            get(best_time::handle_contact_best_time),
        )
        // Loop scheduler trigger
        .route("/api/v1/loop/tick", post(loops::handle_loop_tick))
        .with_state(state)
}
