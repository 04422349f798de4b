use std::sync::Arc;

use crate::config::Config;
use crate::graph::{ConversationSource, MessageGateway};
use crate::llm_client::TextGenerator;
use crate::store::{CampaignStore, ContactStore, PageStore};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pages: Arc<dyn PageStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub gateway: Arc<dyn MessageGateway>,
    pub source: Arc<dyn ConversationSource>,
    /// `None` when no API key is configured; loop ticks then refuse to run.
    pub generator: Option<Arc<dyn TextGenerator>>,
}
