//! REST client
//!
//! Thin wrapper over the chat server's HTTP endpoints: conversation lists,
//! message history, conversation metadata, mark-as-read, the user
//! directory, and account login/registration.
//! Responses are normalized into the shared models here, the same shapes
//! the live channel produces.

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::models::{parse_timestamp, Conversation, ConversationId, MessageRecord, User, UserId};

/// Successful login response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// New account details
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// One page of the user directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<User>,
    /// Directory size, when the server reports it
    pub total: Option<u64>,
    pub has_more: bool,
}

/// `/users/` is paginated on current servers and a bare array on older ones
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserListRecord {
    Page {
        results: Vec<User>,
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
    },
    Plain(Vec<User>),
}

impl From<UserListRecord> for UserPage {
    fn from(record: UserListRecord) -> Self {
        match record {
            UserListRecord::Page {
                results,
                count,
                next,
            } => UserPage {
                users: results,
                total: count,
                has_more: next.is_some(),
            },
            UserListRecord::Plain(users) => UserPage {
                total: Some(users.len() as u64),
                users,
                has_more: false,
            },
        }
    }
}

/// The one-to-one conversation with another user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DirectConversation {
    #[serde(alias = "id")]
    pub conversation_id: ConversationId,
    /// `true` when the server created it for this request
    #[serde(default)]
    pub created: bool,
}

/// Conversation as returned by either `/chats/` or `/conversations/{id}/`
#[derive(Debug, Deserialize)]
struct ConversationRecord {
    #[serde(alias = "conversation_id")]
    id: ConversationId,
    #[serde(default, alias = "user")]
    other_user: Option<User>,
    #[serde(default)]
    last_message: Option<LastMessage>,
    #[serde(default)]
    last_message_time: Option<String>,
    #[serde(default)]
    unread_count: Option<u32>,
}

/// `last_message` is a bare string in list views and an object in detail views
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LastMessage {
    Text(String),
    Detail {
        text: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        let (last_message, detail_time) = match record.last_message {
            Some(LastMessage::Text(text)) => (Some(text), None),
            Some(LastMessage::Detail { text, timestamp }) => (Some(text), timestamp),
            None => (None, None),
        };

        let last_message_time = record
            .last_message_time
            .or(detail_time)
            .as_deref()
            .and_then(parse_timestamp);

        Conversation {
            id: record.id,
            other_user: record.other_user,
            last_message: last_message.filter(|m| !m.is_empty()),
            last_message_time,
            unread_count: record.unread_count.unwrap_or(0),
        }
    }
}

/// REST client bound to one session token
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for the configured API
    pub fn new(config: &Config, token: Option<String>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("chatline/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Whether authorized endpoints can be called at all
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: String,
    ) -> ApiResult<T> {
        debug!("Requesting {}", url);

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            url,
            details: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let request = self.authorized(Method::GET, path)?;
        self.send_json(request, self.url(path)).await
    }

    /// `GET /chats/`: conversation summaries for the sidebar
    pub async fn fetch_conversations(&self) -> ApiResult<Vec<Conversation>> {
        let records: Vec<ConversationRecord> = self.get_json("/chats/").await?;
        Ok(records.into_iter().map(Conversation::from).collect())
    }

    /// `GET /conversations/{id}/`: metadata including the other participant
    pub async fn fetch_conversation(&self, id: ConversationId) -> ApiResult<Conversation> {
        let record: ConversationRecord = self.get_json(&format!("/conversations/{}/", id)).await?;
        Ok(record.into())
    }

    /// `GET /conversations/{id}/messages/`: message history, oldest first
    pub async fn fetch_messages(&self, id: ConversationId) -> ApiResult<Vec<MessageRecord>> {
        self.get_json(&format!("/conversations/{}/messages/", id))
            .await
    }

    /// `POST /conversations/{id}/read/`: mark the conversation read server-side
    pub async fn mark_read(&self, id: ConversationId) -> ApiResult<()> {
        let path = format!("/conversations/{}/read/", id);
        let request = self.authorized(Method::POST, &path)?;
        let url = self.url(&path);
        debug!("Requesting {}", url);

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// `GET /user/`: the signed-in user
    pub async fn current_user(&self) -> ApiResult<User> {
        self.get_json("/user/").await
    }

    /// `GET /users/?page={page}`: everyone except the signed-in user
    pub async fn fetch_users(&self, page: u32) -> ApiResult<UserPage> {
        let record: UserListRecord = self.get_json(&format!("/users/?page={}", page)).await?;
        Ok(record.into())
    }

    /// `GET /users/search/?q=`: match on email or name, at most ten results
    pub async fn search_users(&self, query: &str) -> ApiResult<Vec<User>> {
        let query = query.trim();
        // The server answers a blank query with an empty list
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let path = "/users/search/";
        let request = self.authorized(Method::GET, path)?.query(&[("q", query)]);
        self.send_json(request, self.url(path)).await
    }

    /// `GET /conversations/{user_id}/`: find or create the direct conversation
    /// with another user
    pub async fn open_conversation_with(&self, user_id: UserId) -> ApiResult<DirectConversation> {
        self.get_json(&format!("/conversations/{}/", user_id)).await
    }

    /// `POST /register/`: create an account; no token is needed
    pub async fn register(&self, registration: &Registration) -> ApiResult<User> {
        let url = self.url("/register/");
        let request = self.http.post(&url).json(registration);
        self.send_json(request, url).await
    }

    /// Login lives at the server root rather than under the API prefix
    fn login_url(&self) -> String {
        let root = self.base_url.strip_suffix("/api").unwrap_or(&self.base_url);
        format!("{}/login/", root)
    }

    /// `POST /login/`: exchange credentials for a token
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<LoginResponse> {
        let url = self.login_url();
        let request = self.http.post(&url).json(&LoginRequest { email, password });
        self.send_json(request, url).await
    }
}
