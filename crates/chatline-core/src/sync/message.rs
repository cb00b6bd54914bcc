//! Channel protocol message types
//!
//! JSON text frames exchanged over the per-conversation WebSocket.
//! Inbound frames are normalized here into [`ServerMessage`]; aliases the
//! server uses for the same event (`new_message`, `messages_read`, ...)
//! never leak past this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::models::{ConversationId, MessageId, MessageRecord, UserId};

/// Frames sent to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// New chat message
    Message { message: String },
    /// Local user started typing
    TypingStart { user_name: String },
    /// Local user stopped typing
    TypingStop,
    /// Acknowledge a message from another user
    ReadReceipt { message_id: MessageId },
}

impl ClientMessage {
    /// Encode as a JSON text frame
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Typing indicator transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingStatus {
    Start,
    Stop,
}

/// Events received from the server, in canonical form
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A chat message
    Message(MessageRecord),
    /// A peer started or stopped typing
    Typing {
        user_id: UserId,
        user_name: Option<String>,
        status: TypingStatus,
    },
    /// One or more messages were read
    ReadReceipt { message_ids: Vec<MessageId> },
}

#[derive(Deserialize)]
struct TypingFrame {
    user_id: UserId,
    #[serde(default)]
    user_name: Option<String>,
    status: TypingStatus,
}

#[derive(Deserialize)]
struct ReadReceiptFrame {
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    message_ids: Vec<MessageId>,
}

impl ServerMessage {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        match kind.as_str() {
            "message" | "new_message" => {
                let record: MessageRecord = serde_json::from_value(value)?;
                Ok(ServerMessage::Message(record))
            }
            "typing" => {
                let frame: TypingFrame = serde_json::from_value(value)?;
                Ok(ServerMessage::Typing {
                    user_id: frame.user_id,
                    user_name: frame.user_name,
                    status: frame.status,
                })
            }
            "read_receipt" | "messages_read" => {
                let frame: ReadReceiptFrame = serde_json::from_value(value)?;
                let mut message_ids = frame.message_ids;
                if let Some(id) = frame.message_id {
                    message_ids.insert(0, id);
                }
                Ok(ServerMessage::ReadReceipt { message_ids })
            }
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

/// Build the channel URL for a conversation
///
/// The token travels as a query parameter because browsers and most
/// WebSocket clients cannot set headers on the upgrade request.
pub fn channel_url(ws_base: &str, conversation: ConversationId, token: &str) -> String {
    format!(
        "{}/ws/chat/{}/?token={}",
        ws_base.trim_end_matches('/'),
        conversation,
        token
    )
}
