//! Realtime conversation sync
//!
//! Keeps a chat client's view of the active conversation consistent with
//! the server while events arrive over a per-conversation WebSocket channel
//! and REST fetches complete in any order.
//!
//! ## Layout
//!
//! - `engine`: sans-IO state machine; every operation returns effects
//! - `runtime`: tokio task that owns the engine and performs its effects
//! - `message`: channel wire format
//! - `dedup`, `typing`, `ranker`: derived state kept by the engine
//!
//! ## Usage
//!
//! ```ignore
//! let mut handle = spawn_sync_task(&config, session)?;
//! handle.send(SyncCommand::Connect(3)).await?;
//! while let Some(event) = handle.event_rx.recv().await {
//!     // render handle.snapshot()
//! }
//! ```

mod dedup;
mod engine;
mod message;
mod ranker;
mod runtime;
mod typing;

pub use dedup::SeenMessages;
pub use engine::{ChannelId, Effect, SyncEngine, SyncEvent, SyncSnapshot, Ticket};
pub use message::{channel_url, ClientMessage, ServerMessage, TypingStatus};
pub use ranker::ConversationList;
pub use runtime::{spawn_sync_task, SyncCommand, SyncHandle};
pub use typing::{TypingTracker, TYPING_TIMEOUT};
