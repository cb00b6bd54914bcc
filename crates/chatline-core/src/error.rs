//! Error types
//!
//! Typed errors for the REST collaborators, the channel protocol, and the
//! sync runtime. Application code wraps these in `anyhow` with context.

use thiserror::Error;

/// Errors returned by the REST client
#[derive(Error, Debug)]
pub enum ApiError {
    /// No session token is available, so the call was not made
    #[error("Not signed in: no session token available")]
    MissingToken,

    /// Server answered with a non-success status
    #[error("Request to '{url}' failed with HTTP status {status}")]
    Status { url: String, status: u16 },

    /// Transport-level failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Invalid response from '{url}': {details}")]
    Decode { url: String, details: String },
}

impl ApiError {
    /// Whether the server rejected the session token
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401 | 403, .. })
    }
}

/// Errors decoding inbound channel frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match the event shape
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame had no `type` discriminant
    #[error("Frame is missing its 'type' field")]
    MissingType,

    /// Frame carried a discriminant this client does not handle
    #[error("Unknown event type '{0}'")]
    UnknownType(String),
}

/// Errors surfaced by the sync engine and its runtime
#[derive(Error, Debug)]
pub enum SyncError {
    /// No open channel for the active conversation
    #[error("Cannot send: not connected to a conversation")]
    NotConnected,

    /// The runtime task has stopped and no longer accepts commands
    #[error("Sync task has stopped")]
    Stopped,

    /// The REST client could not be built
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result type for REST operations
pub type ApiResult<T> = Result<T, ApiError>;
