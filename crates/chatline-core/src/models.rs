//! Data models for Chatline
//!
//! Defines the core data structures: users, messages, and conversations.
//! Wire payloads from the channel and the REST API are normalized into
//! these types once, at the boundary, so nothing downstream has to care
//! which field aliases the server used.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a user account
pub type UserId = i64;

/// Identity of a conversation thread
pub type ConversationId = i64;

/// Name shown for a peer who has no usable display name
pub const UNKNOWN_NAME: &str = "Someone";

/// Server-assigned message identity (numeric or string on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl MessageId {
    /// Compare by rendered value, so `5` and `"5"` name the same message
    pub fn same_as(&self, other: &MessageId) -> bool {
        match (self, other) {
            (MessageId::Number(a), MessageId::Number(b)) => a == b,
            (MessageId::Text(a), MessageId::Text(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Number(n)
    }
}

/// De-duplication identity of a message within one conversation session
///
/// The server id when there is one, otherwise `sender_id:timestamp`
/// (echoed or optimistic sends that have no id yet).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey(String);

impl MessageKey {
    pub fn derive(id: Option<&MessageId>, sender_id: UserId, timestamp: &str) -> Self {
        match id {
            Some(id) => MessageKey(id.to_string()),
            None => MessageKey(format!("{}:{}", sender_id, timestamp)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user account as returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl User {
    /// Full name, falling back to email, then to a placeholder
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            full.to_string()
        } else if !self.email.is_empty() {
            self.email.clone()
        } else {
            UNKNOWN_NAME.to_string()
        }
    }
}

/// A message as delivered by the channel or the REST history, before it is
/// bound to the local session
///
/// Field aliases cover both the live event shape (`sender_id`, `message`)
/// and the history record shapes (`sender`, `text`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(alias = "sender")]
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(alias = "text")]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub is_read: Option<bool>,
}

impl MessageRecord {
    pub fn key(&self) -> MessageKey {
        MessageKey::derive(self.id.as_ref(), self.sender_id, &self.timestamp)
    }

    /// Bind the record to a session
    ///
    /// `conversation` is used when the record does not name its own
    /// conversation (history records never do).
    pub fn into_message(
        self,
        conversation: ConversationId,
        current_user: Option<UserId>,
    ) -> Message {
        let key = self.key();
        let sent_at = parse_timestamp(&self.timestamp);
        Message {
            key,
            id: self.id,
            conversation_id: self.conversation_id.unwrap_or(conversation),
            sender_id: self.sender_id,
            sender_name: self
                .sender_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            text: self.message,
            timestamp: self.timestamp,
            sent_at,
            is_read: self.is_read.unwrap_or(false),
            is_sent_by_me: current_user == Some(self.sender_id),
        }
    }
}

/// A chat message in the active conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: MessageKey,
    pub id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    /// Timestamp exactly as the server sent it
    pub timestamp: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_sent_by_me: bool,
}

/// A conversation row in the sidebar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub other_user: Option<User>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl Conversation {
    /// Create an empty conversation (no messages yet)
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            other_user: None,
            last_message: None,
            last_message_time: None,
            unread_count: 0,
        }
    }

    /// Title for list views
    pub fn title(&self) -> String {
        match self.other_user {
            Some(ref user) => user.display_name(),
            None => format!("Conversation {}", self.id),
        }
    }
}

/// A peer currently shown as typing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUser {
    pub user_id: UserId,
    pub name: String,
}

/// Parse a server timestamp
///
/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS[.ffffff][+00:00]` form the
/// channel uses. Offset-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
