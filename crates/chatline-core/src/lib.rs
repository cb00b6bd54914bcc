//! Chatline Core Library
//!
//! This crate provides the realtime conversation sync for Chatline, a
//! terminal client for a one-to-one chat server.
//!
//! # Architecture
//!
//! - **Sync engine**: single owner of conversation state, driven by channel
//!   frames, REST results, and UI intents
//! - **REST client**: history, conversation lists, mark-as-read, the user
//!   directory, login and registration
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let session = Session::load(&config.session_path())?;
//!
//! let handle = spawn_sync_task(&config, session)?;
//! handle.send(SyncCommand::Connect(42)).await?;
//! handle.send(SyncCommand::SendMessage("hi".into())).await?;
//! ```
//!
//! # Modules
//!
//! - `sync`: engine, runtime, and channel protocol (main entry point)
//! - `api`: REST client
//! - `models`: users, messages, and conversations
//! - `session`: token and current user
//! - `config`: Application configuration
//! - `error`: typed errors

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod sync;

pub use api::{ApiClient, DirectConversation, LoginResponse, Registration, UserPage};
pub use config::Config;
pub use error::{ApiError, ApiResult, ProtocolError, SyncError};
pub use models::{Conversation, ConversationId, Message, MessageId, TypingUser, User, UserId};
pub use session::Session;
pub use sync::{spawn_sync_task, SyncCommand, SyncEvent, SyncHandle, SyncSnapshot};
