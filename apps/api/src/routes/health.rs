use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub loop_scheduler: LoopReadiness,
}

/// Whether loop ticks can run. Both halves are optional at startup, and a
/// tick without either is refused with a configuration error.
#[derive(Debug, Serialize)]
pub struct LoopReadiness {
    pub ready: bool,
    pub text_generator: bool,
    pub cron_secret: bool,
    pub in_process_ticker: bool,
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let text_generator = state.generator.is_some();
    let cron_secret = state.config.cron_secret.is_some();

    Json(HealthResponse {
        status: "ok",
        service: "pagereach-api",
        version: env!("CARGO_PKG_VERSION"),
        loop_scheduler: LoopReadiness {
            ready: text_generator && cron_secret,
            text_generator,
            cron_secret,
            in_process_ticker: text_generator && state.config.loop_settings.tick_interval.is_some(),
        },
    })
}
