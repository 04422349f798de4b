//! Messenger Graph API client. Wraps send, conversation listing, message
//! history and profile lookups with retry on 429/5xx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use super::{
    ConversationPage, ConversationSource, GraphError, MessageGateway, PageCredentials,
    Participant, Profile, RemoteConversation, RemoteMessage, SentMessage,
};

const GRAPH_BASE_URL: &str = "https://graph.facebook.com";
const MAX_RETRIES: u32 = 3;
const MESSAGE_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    message: String,
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    cursors: Option<Cursors>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cursors {
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationItem {
    id: String,
    #[serde(default)]
    participants: Option<Paged<Participant>>,
    updated_time: String,
}

#[derive(Debug, Deserialize)]
struct MessageItem {
    from: Option<Participant>,
    #[serde(default)]
    message: Option<String>,
    created_time: String,
}

#[derive(Debug, Deserialize)]
struct ProfileItem {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    profile_pic: Option<String>,
}

/// Shared Graph API client. Implements both `MessageGateway` and `ConversationSource`.
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(api_version: &str) -> Result<Self, GraphError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            base_url: format!("{GRAPH_BASE_URL}/{api_version}"),
        })
    }

    /// Sends a request, retrying on 429 and 5xx with exponential backoff.
    /// `build` is called once per attempt because request builders are not reusable.
    async fn execute<T, F>(&self, build: F) -> Result<T, GraphError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error: Option<GraphError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 500ms, 1s
                let delay = std::time::Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "Graph call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match build().send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(GraphError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<T>().await?);
            }

            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<GraphErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.code, envelope.error.message),
                Err(_) => (None, body),
            };
            let err = GraphError::Api {
                status: status.as_u16(),
                code,
                message,
            };

            if (status.as_u16() == 429 || status.is_server_error()) && !err.is_credential_fault() {
                warn!("Graph API returned {}: {}", status, err);
                last_error = Some(err);
                continue;
            }

            return Err(err);
        }

        Err(last_error.unwrap_or(GraphError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl MessageGateway for GraphClient {
    async fn send_text(
        &self,
        page: &PageCredentials,
        recipient_id: &str,
        text: &str,
    ) -> Result<SentMessage, GraphError> {
        let url = format!("{}/{}/messages", self.base_url, page.page_id);
        let body = serde_json::json!({
            "recipient": { "id": recipient_id },
            "message": { "text": text },
            "messaging_type": "MESSAGE_TAG",
            "tag": "ACCOUNT_UPDATE",
        });

        let sent: SentMessage = self
            .execute(|| {
                self.client
                    .post(&url)
                    .query(&[("access_token", page.access_token.as_str())])
                    .json(&body)
            })
            .await?;

        debug!(recipient_id, message_id = %sent.message_id, "Graph send succeeded");
        Ok(sent)
    }
}

#[async_trait]
impl ConversationSource for GraphClient {
    async fn list_conversations(
        &self,
        page: &PageCredentials,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ConversationPage, GraphError> {
        let url = format!("{}/{}/conversations", self.base_url, page.page_id);
        let limit = page_size.to_string();

        let paged: Paged<ConversationItem> = self
            .execute(|| {
                let mut query = vec![
                    ("fields", "id,participants,updated_time"),
                    ("limit", limit.as_str()),
                    ("access_token", page.access_token.as_str()),
                ];
                if let Some(after) = cursor {
                    query.push(("after", after));
                }
                self.client.get(&url).query(&query)
            })
            .await?;

        let next_cursor = paged
            .paging
            .filter(|p| p.next.is_some())
            .and_then(|p| p.cursors)
            .and_then(|c| c.after);

        let conversations = paged
            .data
            .into_iter()
            .filter_map(|item| {
                let updated_at = parse_graph_time(&item.updated_time)?;
                Some(RemoteConversation {
                    id: item.id,
                    participants: item.participants.map(|p| p.data).unwrap_or_default(),
                    updated_at,
                })
            })
            .collect();

        Ok(ConversationPage {
            conversations,
            next_cursor,
        })
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        access_token: &str,
    ) -> Result<Vec<RemoteMessage>, GraphError> {
        let url = format!("{}/{}/messages", self.base_url, conversation_id);
        let limit = MESSAGE_HISTORY_LIMIT.to_string();

        let paged: Paged<MessageItem> = self
            .execute(|| {
                self.client.get(&url).query(&[
                    ("fields", "from,message,created_time"),
                    ("limit", limit.as_str()),
                    ("access_token", access_token),
                ])
            })
            .await?;

        Ok(paged
            .data
            .into_iter()
            .filter_map(|item| {
                Some(RemoteMessage {
                    from_id: item.from?.id,
                    text: item.message,
                    created_at: parse_graph_time(&item.created_time)?,
                })
            })
            .collect())
    }

    async fn get_profile(&self, user_id: &str, access_token: &str) -> Result<Profile, GraphError> {
        let url = format!("{}/{}", self.base_url, user_id);

        let item: ProfileItem = self
            .execute(|| {
                self.client.get(&url).query(&[
                    ("fields", "name,first_name,last_name,profile_pic"),
                    ("access_token", access_token),
                ])
            })
            .await?;

        let name = item.name.or_else(|| {
            let joined = [item.first_name, item.last_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        });

        Ok(Profile {
            name,
            picture_url: item.profile_pic,
        })
    }
}

/// Graph timestamps look like `2024-05-01T13:45:10+0000`.
fn parse_graph_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
