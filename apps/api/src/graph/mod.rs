//! Remote messaging platform seams.
//!
//! `MessageGateway` sends one message to one recipient; `ConversationSource`
//! pages through a business page's conversations and their messages. Both are
//! carried in `AppState` as trait objects so the dispatcher, sync engine and
//! loop scheduler never talk to HTTP directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

mod client;

pub use client::GraphClient;

/// Graph error codes that mean the token is invalid, expired or lacks a permission.
const CREDENTIAL_ERROR_CODES: [i64; 4] = [190, 102, 10, 3];

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}, code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Timed out after {0}ms")]
    Timeout(u128),
}

impl GraphError {
    /// True when retrying without reauthorizing the page cannot succeed.
    pub fn is_credential_fault(&self) -> bool {
        match self {
            GraphError::Api { status, code, .. } => {
                matches!(status, 401 | 403)
                    || code.is_some_and(|c| {
                        CREDENTIAL_ERROR_CODES.contains(&c) || (200..300).contains(&c)
                    })
            }
            _ => false,
        }
    }
}

/// Outbound identity of a page: the platform page id and its access token.
#[derive(Debug, Clone)]
pub struct PageCredentials {
    pub page_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteConversation {
    pub id: String,
    pub participants: Vec<Participant>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteConversation {
    /// The participant that is not the page itself.
    pub fn contact(&self, page_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id != page_id)
    }
}

#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub conversations: Vec<RemoteConversation>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub from_id: String,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send_text(
        &self,
        page: &PageCredentials,
        recipient_id: &str,
        text: &str,
    ) -> Result<SentMessage, GraphError>;
}

/// Conversations are returned most recently updated first.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn list_conversations(
        &self,
        page: &PageCredentials,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ConversationPage, GraphError>;

    async fn list_messages(
        &self,
        conversation_id: &str,
        access_token: &str,
    ) -> Result<Vec<RemoteMessage>, GraphError>;

    async fn get_profile(&self, user_id: &str, access_token: &str) -> Result<Profile, GraphError>;
}
