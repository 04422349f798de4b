mod batch;
mod best_time;
mod config;
mod db;
mod dispatch;
mod errors;
mod graph;
mod llm_client;
mod loop_scheduler;
mod models;
mod routes;
mod state;
mod store;
mod sync;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::graph::GraphClient;
use crate::llm_client::{LlmClient, TextGenerator};
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting PageReach API v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Operation budget {}s (request ceiling {}s)",
        config.operation_budget().as_secs(),
        config.max_request_duration.as_secs()
    );

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db));

    // Initialize Graph API client (gateway + conversation source)
    let graph = Arc::new(GraphClient::new(&config.graph_api_version)?);
    info!("Graph API client initialized ({})", config.graph_api_version);

    // Initialize LLM client when a key is configured
    let generator: Option<Arc<dyn TextGenerator>> = match &config.anthropic_api_key {
        Some(key) => {
            let llm: Arc<dyn TextGenerator> = Arc::new(LlmClient::new(key.clone())?);
            info!("LLM client initialized (model: {})", llm_client::MODEL);
            Some(llm)
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set; loop campaigns will not run");
            None
        }
    };
    if config.cron_secret.is_none() {
        warn!("CRON_SECRET not set; the loop tick endpoint will refuse requests");
    }

    // Build app state
    let state = AppState {
        config: config.clone(),
        pages: store.clone(),
        campaigns: store.clone(),
        contacts: store,
        gateway: graph.clone(),
        source: graph,
        generator,
    };

    if let Some(every) = config.loop_settings.tick_interval {
        if state.generator.is_some() {
            loop_scheduler::spawn_ticker(state.clone(), every);
        } else {
            warn!("LOOP_TICK_INTERVAL_SECS is set but no text generator is configured; ticker not started");
        }
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the dashboard host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
