//! Hand-written fakes for the remote seams, used by the dispatch, sync and
//! loop scheduler tests. All of them record what they were asked to do.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::graph::{
    ConversationPage, ConversationSource, GraphError, MessageGateway, PageCredentials,
    Participant, Profile, RemoteConversation, RemoteMessage, SentMessage,
};
use crate::llm_client::{LlmError, TextGenerator};

/// Long enough that any per-call timeout used in tests fires first.
const HANG: Duration = Duration::from_secs(3600);

fn credential_error() -> GraphError {
    GraphError::Api {
        status: 400,
        code: Some(190),
        message: "Error validating access token".to_string(),
    }
}

fn user_unavailable() -> GraphError {
    GraphError::Api {
        status: 400,
        code: Some(551),
        message: "This person isn't available right now".to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MockGateway
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockGateway {
    sent: Mutex<Vec<(String, String)>>,
    failing: HashSet<String>,
    rejecting_token: HashSet<String>,
    delay: Option<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to these recipients fail with a per-recipient error.
    pub fn failing_for(mut self, psids: &[&str]) -> Self {
        self.failing.extend(psids.iter().map(|p| p.to_string()));
        self
    }

    /// Sends to these recipients fail with an expired-token error.
    pub fn rejecting_token_for(mut self, psids: &[&str]) -> Self {
        self.rejecting_token
            .extend(psids.iter().map(|p| p.to_string()));
        self
    }

    /// Every send takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(recipient, text)` of every successful send, in completion order.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn sends_to(&self, psid: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == psid)
            .count()
    }
}

#[async_trait]
impl MessageGateway for MockGateway {
    async fn send_text(
        &self,
        _page: &PageCredentials,
        recipient_id: &str,
        text: &str,
    ) -> Result<SentMessage, GraphError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejecting_token.contains(recipient_id) {
            return Err(credential_error());
        }
        if self.failing.contains(recipient_id) {
            return Err(user_unavailable());
        }

        let mut sent = self.sent.lock().await;
        sent.push((recipient_id.to_string(), text.to_string()));
        Ok(SentMessage {
            message_id: format!("m_{}", sent.len()),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MockConversationSource
// ────────────────────────────────────────────────────────────────────────────

/// Serves a fixed conversation list (most recent first) paged by offset cursors.
#[derive(Default)]
pub struct MockConversationSource {
    conversations: Vec<RemoteConversation>,
    messages: HashMap<String, Vec<RemoteMessage>>,
    profiles: HashMap<String, Profile>,
    hanging_profiles: HashSet<String>,
    failing_messages: HashSet<String>,
    hanging_messages: HashSet<String>,
    reject_token: bool,
    listing_delay: Option<Duration>,
    list_calls: Mutex<usize>,
    message_calls: Mutex<Vec<String>>,
}

impl MockConversationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a conversation between `page_external_id` and `psid`.
    /// Call in most-recent-first order.
    pub fn conversation(
        mut self,
        page_external_id: &str,
        psid: &str,
        name: &str,
        updated_at: DateTime<Utc>,
    ) -> Self {
        self.conversations.push(RemoteConversation {
            id: format!("t_{psid}"),
            participants: vec![
                Participant {
                    id: page_external_id.to_string(),
                    name: Some("Corner Bakery".to_string()),
                },
                Participant {
                    id: psid.to_string(),
                    name: Some(name.to_string()),
                },
            ],
            updated_at,
        });
        self
    }

    /// Messages in the conversation with `psid`, each tagged with its author.
    pub fn messages(mut self, psid: &str, messages: &[(&str, DateTime<Utc>)]) -> Self {
        self.messages.insert(
            format!("t_{psid}"),
            messages
                .iter()
                .map(|(from, at)| RemoteMessage {
                    from_id: from.to_string(),
                    text: Some("hello".to_string()),
                    created_at: *at,
                })
                .collect(),
        );
        self
    }

    pub fn profile(mut self, psid: &str, name: &str, picture_url: &str) -> Self {
        self.profiles.insert(
            psid.to_string(),
            Profile {
                name: Some(name.to_string()),
                picture_url: Some(picture_url.to_string()),
            },
        );
        self
    }

    pub fn hanging_profile(mut self, psid: &str) -> Self {
        self.hanging_profiles.insert(psid.to_string());
        self
    }

    pub fn failing_messages(mut self, psid: &str) -> Self {
        self.failing_messages.insert(format!("t_{psid}"));
        self
    }

    pub fn hanging_messages(mut self, psid: &str) -> Self {
        self.hanging_messages.insert(format!("t_{psid}"));
        self
    }

    /// Conversation listing fails with an expired-token error.
    pub fn rejecting_token(mut self) -> Self {
        self.reject_token = true;
        self
    }

    /// Every listing call takes this long.
    pub fn slow_listing(mut self, delay: Duration) -> Self {
        self.listing_delay = Some(delay);
        self
    }

    pub async fn list_calls(&self) -> usize {
        *self.list_calls.lock().await
    }

    pub async fn message_calls(&self) -> Vec<String> {
        self.message_calls.lock().await.clone()
    }
}

#[async_trait]
impl ConversationSource for MockConversationSource {
    async fn list_conversations(
        &self,
        _page: &PageCredentials,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ConversationPage, GraphError> {
        *self.list_calls.lock().await += 1;
        if let Some(delay) = self.listing_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_token {
            return Err(credential_error());
        }

        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + page_size.max(1) as usize).min(self.conversations.len());
        Ok(ConversationPage {
            conversations: self.conversations[start.min(end)..end].to_vec(),
            next_cursor: (end < self.conversations.len()).then(|| end.to_string()),
        })
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        _access_token: &str,
    ) -> Result<Vec<RemoteMessage>, GraphError> {
        self.message_calls
            .lock()
            .await
            .push(conversation_id.to_string());
        if self.hanging_messages.contains(conversation_id) {
            tokio::time::sleep(HANG).await;
        }
        if self.failing_messages.contains(conversation_id) {
            return Err(GraphError::Api {
                status: 500,
                code: Some(2),
                message: "Service temporarily unavailable".to_string(),
            });
        }
        Ok(self
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_profile(&self, user_id: &str, _access_token: &str) -> Result<Profile, GraphError> {
        if self.hanging_profiles.contains(user_id) {
            tokio::time::sleep(HANG).await;
        }
        Ok(self.profiles.get(user_id).cloned().unwrap_or_default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MockGenerator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorBehavior {
    Reply,
    Fail,
    Hang,
}

pub struct MockGenerator {
    behavior: GeneratorBehavior,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockGenerator {
    pub fn new(behavior: GeneratorBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(prompt, first_name)` of every call.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str, contact_first_name: &str) -> Result<String, LlmError> {
        self.calls
            .lock()
            .await
            .push((prompt.to_string(), contact_first_name.to_string()));

        match self.behavior {
            GeneratorBehavior::Reply => Ok(format!("Fresh bread today, {contact_first_name}!")),
            GeneratorBehavior::Fail => Err(LlmError::EmptyContent),
            GeneratorBehavior::Hang => {
                tokio::time::sleep(HANG).await;
                Err(LlmError::EmptyContent)
            }
        }
    }
}
