//! Sync engine
//!
//! Owns every piece of conversation state for one signed-in session: the
//! active conversation and its channel, the message list, the seen-message
//! index, typing peers, and the ranked conversation list.
//!
//! The engine performs no I/O. Each operation applies its change and
//! returns the [`Effect`]s the runtime must carry out (open a socket, send
//! a frame, call a REST endpoint, notify the UI). Results of that work come
//! back in through the `*_loaded` / `channel_*` operations, tagged so that
//! anything belonging to an abandoned conversation or a superseded channel
//! is dropped.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dedup::SeenMessages;
use super::message::{ClientMessage, ServerMessage, TypingStatus};
use super::ranker::ConversationList;
use super::typing::TypingTracker;
use crate::error::{ApiError, SyncError};
use crate::models::{
    Conversation, ConversationId, Message, MessageId, MessageRecord, TypingUser, UserId,
    UNKNOWN_NAME,
};
use crate::session::Session;

/// Identity of one channel (socket) opened by the engine
pub type ChannelId = u64;

/// Tag for REST results that belong to one conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub conversation: ConversationId,
    pub session: u64,
}

/// Work the runtime must perform on the engine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a socket for `conversation` and report back as `channel`
    OpenChannel {
        channel: ChannelId,
        conversation: ConversationId,
        token: String,
    },
    /// Close a socket
    CloseChannel { channel: ChannelId },
    /// Write a frame to an open socket
    Send {
        channel: ChannelId,
        message: ClientMessage,
    },
    /// `GET /conversations/{id}/messages/`
    FetchHistory { ticket: Ticket },
    /// `GET /conversations/{id}/`
    FetchConversation { ticket: Ticket },
    /// `GET /chats/`
    FetchConversations,
    /// `POST /conversations/{id}/read/`
    MarkRead { conversation: ConversationId },
    /// Tell the UI something changed
    Notify(SyncEvent),
}

/// Events emitted to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connectivity or active conversation changed
    ConnectionChanged {
        conversation: Option<ConversationId>,
        connected: bool,
    },
    /// A new message was appended
    MessageReceived(Message),
    /// History for the active conversation was merged
    HistoryLoaded {
        conversation: ConversationId,
        added: usize,
    },
    /// The set of typing peers changed
    TypingChanged(Vec<TypingUser>),
    /// Messages were flagged read
    MessagesRead,
    /// The conversation list changed
    ConversationsUpdated,
    /// A background operation failed
    Error(String),
}

/// Read-only view of the engine state for rendering
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub active_conversation: Option<ConversationId>,
    pub connected: bool,
    pub messages: Vec<Message>,
    pub typing: Vec<TypingUser>,
    pub conversations: Vec<Conversation>,
    pub loading_history: bool,
    pub loading_conversations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelPhase {
    Opening,
    Open,
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    id: ChannelId,
    conversation: ConversationId,
    phase: ChannelPhase,
}

/// Conversation sync state machine
#[derive(Debug)]
pub struct SyncEngine {
    session: Session,
    active: Option<ConversationId>,
    channel: Option<Channel>,
    next_channel: ChannelId,
    /// Bumped on every conversation switch; stale REST results fail the check
    session_epoch: u64,
    messages: Vec<Message>,
    seen: SeenMessages,
    typing: TypingTracker,
    conversations: ConversationList,
    loading_history: bool,
    loading_conversations: bool,
}

impl SyncEngine {
    pub fn new(session: Session, typing_timeout: Duration) -> Self {
        Self {
            session,
            active: None,
            channel: None,
            next_channel: 1,
            session_epoch: 0,
            messages: Vec::new(),
            seen: SeenMessages::new(),
            typing: TypingTracker::new(typing_timeout),
            conversations: ConversationList::new(),
            loading_history: false,
            loading_conversations: false,
        }
    }

    fn me(&self) -> Option<UserId> {
        self.session.user_id()
    }

    fn open_channel(&self) -> Option<Channel> {
        self.channel.filter(|c| c.phase == ChannelPhase::Open)
    }

    fn ticket(&self, conversation: ConversationId) -> Ticket {
        Ticket {
            conversation,
            session: self.session_epoch,
        }
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        ticket.session == self.session_epoch && self.active == Some(ticket.conversation)
    }

    fn connection_event(&self) -> Effect {
        Effect::Notify(SyncEvent::ConnectionChanged {
            conversation: self.active,
            connected: self.is_connected(),
        })
    }

    // ------------------------------------------------------------------
    // Connection management
    // ------------------------------------------------------------------

    /// Make `conversation` the active one and open a channel for it
    pub fn connect(&mut self, conversation: ConversationId) -> Vec<Effect> {
        let Some(token) = self.session.token().map(str::to_string) else {
            warn!("Cannot connect to conversation {}: not signed in", conversation);
            return Vec::new();
        };

        if self.active == Some(conversation) && self.open_channel().is_some() {
            debug!("Already connected to conversation {}", conversation);
            return Vec::new();
        }

        let mut effects = Vec::new();

        if let Some(previous) = self.channel.take() {
            debug!(
                "Closing channel {} for conversation {}",
                previous.id, previous.conversation
            );
            effects.push(Effect::CloseChannel { channel: previous.id });
        }

        if self.active != Some(conversation) {
            info!("Switching to conversation {}", conversation);
            self.session_epoch += 1;
            self.clear_history();
            if !self.typing.is_empty() {
                self.typing.clear();
                effects.push(Effect::Notify(SyncEvent::TypingChanged(Vec::new())));
            }
            self.active = Some(conversation);
            self.loading_history = true;

            let ticket = self.ticket(conversation);
            effects.push(Effect::FetchHistory { ticket });
            effects.push(Effect::FetchConversation { ticket });
        }

        let id = self.next_channel;
        self.next_channel += 1;
        self.channel = Some(Channel {
            id,
            conversation,
            phase: ChannelPhase::Opening,
        });
        effects.push(Effect::OpenChannel {
            channel: id,
            conversation,
            token,
        });
        effects.push(self.connection_event());
        effects
    }

    /// Close the channel and leave the active conversation
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(channel) = self.channel.take() {
            info!("Disconnecting from conversation {}", channel.conversation);
            effects.push(Effect::CloseChannel { channel: channel.id });
        }
        self.active = None;
        self.loading_history = false;
        if !self.typing.is_empty() {
            self.typing.clear();
            effects.push(Effect::Notify(SyncEvent::TypingChanged(Vec::new())));
        }
        effects.push(self.connection_event());
        effects
    }

    /// The runtime finished opening a socket
    pub fn channel_opened(&mut self, channel: ChannelId) -> Vec<Effect> {
        let conversation = match self.channel.as_mut() {
            Some(current) if current.id == channel => {
                current.phase = ChannelPhase::Open;
                current.conversation
            }
            _ => {
                debug!("Channel {} opened after being superseded, closing it", channel);
                return vec![Effect::CloseChannel { channel }];
            }
        };

        info!("Connected to conversation {}", conversation);
        let mut effects = vec![self.connection_event()];
        effects.extend(self.mark_as_read(conversation));
        effects
    }

    /// A socket closed (or failed to open) without being asked to
    pub fn channel_closed(&mut self, channel: ChannelId) -> Vec<Effect> {
        let closed = match self.channel {
            Some(current) if current.id == channel => current,
            _ => {
                debug!("Ignoring close of superseded channel {}", channel);
                return Vec::new();
            }
        };

        warn!("Channel for conversation {} closed", closed.conversation);
        self.channel = None;
        if self.active == Some(closed.conversation) {
            self.active = None;
            self.loading_history = false;
        }
        vec![self.connection_event()]
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Apply a text frame received on `channel`
    pub fn handle_frame(&mut self, channel: ChannelId, text: &str, now: Instant) -> Vec<Effect> {
        let conversation = match self.channel {
            Some(current) if current.id == channel => current.conversation,
            _ => {
                debug!("Dropping frame from superseded channel {}", channel);
                return Vec::new();
            }
        };

        match ServerMessage::decode(text) {
            Ok(event) => self.apply_event(conversation, event, now),
            Err(e) => {
                warn!("Discarding inbound frame: {}", e);
                Vec::new()
            }
        }
    }

    /// Apply a decoded event that arrived on the channel for `conversation`
    pub fn apply_event(
        &mut self,
        conversation: ConversationId,
        event: ServerMessage,
        now: Instant,
    ) -> Vec<Effect> {
        match event {
            ServerMessage::Message(record) => self.apply_message(conversation, record),
            ServerMessage::Typing {
                user_id,
                user_name,
                status,
            } => self.apply_typing(user_id, user_name, status, now),
            ServerMessage::ReadReceipt { message_ids } => self.apply_read_receipt(&message_ids),
        }
    }

    fn apply_message(
        &mut self,
        conversation: ConversationId,
        record: MessageRecord,
    ) -> Vec<Effect> {
        let key = record.key();
        if !self.seen.insert(key.clone()) {
            debug!("Duplicate message ignored: {}", key);
            return Vec::new();
        }

        let message = record.into_message(conversation, self.me());
        debug!(
            "Message {} from {} in conversation {}",
            message.key, message.sender_id, message.conversation_id
        );

        self.messages.push(message.clone());
        self.conversations.apply_latest_message(&message, self.active);

        let mut effects = vec![
            Effect::Notify(SyncEvent::MessageReceived(message.clone())),
            Effect::Notify(SyncEvent::ConversationsUpdated),
        ];

        if !message.is_sent_by_me && self.active == Some(message.conversation_id) {
            if let (Some(channel), Some(id)) = (self.open_channel(), message.id.clone()) {
                effects.push(Effect::Send {
                    channel: channel.id,
                    message: ClientMessage::ReadReceipt { message_id: id },
                });
            }
            effects.extend(self.mark_as_read(message.conversation_id));
        }

        effects
    }

    fn apply_typing(
        &mut self,
        user_id: UserId,
        user_name: Option<String>,
        status: TypingStatus,
        now: Instant,
    ) -> Vec<Effect> {
        if self.me() == Some(user_id) {
            return Vec::new();
        }

        let changed = match status {
            TypingStatus::Start => {
                let name = user_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_NAME.to_string());
                self.typing.start(user_id, name, now)
            }
            TypingStatus::Stop => self.typing.stop(user_id),
        };

        if changed {
            vec![Effect::Notify(SyncEvent::TypingChanged(self.typing.users()))]
        } else {
            Vec::new()
        }
    }

    fn apply_read_receipt(&mut self, message_ids: &[MessageId]) -> Vec<Effect> {
        let mut changed = false;
        for target in message_ids {
            for message in self.messages.iter_mut() {
                if !message.is_read && message.id.as_ref().is_some_and(|id| id.same_as(target)) {
                    message.is_read = true;
                    changed = true;
                }
            }
        }

        if changed {
            vec![Effect::Notify(SyncEvent::MessagesRead)]
        } else {
            debug!("Read receipt for messages not loaded locally");
            Vec::new()
        }
    }

    // ------------------------------------------------------------------
    // Typing expiry
    // ------------------------------------------------------------------

    /// When the runtime should next call [`expire_typing`](Self::expire_typing)
    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.typing.next_deadline()
    }

    /// Drop typing peers whose deadline has passed
    pub fn expire_typing(&mut self, now: Instant) -> Vec<Effect> {
        let expired = self.typing.expire(now);
        if expired.is_empty() {
            return Vec::new();
        }
        debug!("Typing expired for {:?}", expired);
        vec![Effect::Notify(SyncEvent::TypingChanged(self.typing.users()))]
    }

    // ------------------------------------------------------------------
    // Outbound intents
    // ------------------------------------------------------------------

    /// Send a chat message on the open channel
    pub fn send_message(&mut self, text: &str) -> Result<Vec<Effect>, SyncError> {
        let channel = self.open_channel().ok_or(SyncError::NotConnected)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Effect::Send {
            channel: channel.id,
            message: ClientMessage::Message {
                message: text.to_string(),
            },
        }])
    }

    /// Announce that the local user started typing (no-op when disconnected)
    pub fn typing_start(&self) -> Vec<Effect> {
        match self.open_channel() {
            Some(channel) => vec![Effect::Send {
                channel: channel.id,
                message: ClientMessage::TypingStart {
                    user_name: self.session.display_name(),
                },
            }],
            None => Vec::new(),
        }
    }

    /// Announce that the local user stopped typing (no-op when disconnected)
    pub fn typing_stop(&self) -> Vec<Effect> {
        match self.open_channel() {
            Some(channel) => vec![Effect::Send {
                channel: channel.id,
                message: ClientMessage::TypingStop,
            }],
            None => Vec::new(),
        }
    }

    /// Zero the unread counter and flag messages read, locally and remotely
    pub fn mark_as_read(&mut self, conversation: ConversationId) -> Vec<Effect> {
        if !self.session.is_authenticated() {
            return Vec::new();
        }

        let mut effects = vec![Effect::MarkRead { conversation }];

        if self.conversations.mark_read(conversation) {
            effects.push(Effect::Notify(SyncEvent::ConversationsUpdated));
        }

        if self.active == Some(conversation) {
            let mut changed = false;
            for message in self.messages.iter_mut().filter(|m| !m.is_read) {
                message.is_read = true;
                changed = true;
            }
            if changed {
                effects.push(Effect::Notify(SyncEvent::MessagesRead));
            }
        }

        effects
    }

    /// Request a fresh conversation list
    pub fn refresh_conversations(&mut self) -> Vec<Effect> {
        if !self.session.is_authenticated() {
            return Vec::new();
        }
        self.loading_conversations = true;
        vec![Effect::FetchConversations]
    }

    /// Drop the loaded messages and the seen-message index
    pub fn clear_history(&mut self) {
        if !self.seen.is_empty() {
            debug!("Forgetting {} seen messages", self.seen.len());
        }
        self.messages.clear();
        self.seen.clear();
    }

    // ------------------------------------------------------------------
    // REST results
    // ------------------------------------------------------------------

    /// Merge fetched history ahead of any live messages already received
    pub fn history_loaded(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<MessageRecord>, ApiError>,
    ) -> Vec<Effect> {
        if !self.is_current(ticket) {
            debug!("Discarding stale history for conversation {}", ticket.conversation);
            return Vec::new();
        }
        self.loading_history = false;

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to load history for conversation {}: {}", ticket.conversation, e);
                return vec![Effect::Notify(SyncEvent::Error(format!(
                    "Failed to load messages: {}",
                    e
                )))];
            }
        };

        let me = self.me();
        let mut history = Vec::with_capacity(records.len());
        for record in records {
            if self.seen.insert(record.key()) {
                history.push(record.into_message(ticket.conversation, me));
            }
        }

        let added = history.len();
        let live = std::mem::replace(&mut self.messages, history);
        self.messages.extend(live);

        debug!("Loaded {} history messages for conversation {}", added, ticket.conversation);
        vec![Effect::Notify(SyncEvent::HistoryLoaded {
            conversation: ticket.conversation,
            added,
        })]
    }

    /// Merge conversation metadata (participant) for the active conversation
    pub fn conversation_loaded(
        &mut self,
        ticket: Ticket,
        result: Result<Conversation, ApiError>,
    ) -> Vec<Effect> {
        if !self.is_current(ticket) {
            debug!("Discarding stale metadata for conversation {}", ticket.conversation);
            return Vec::new();
        }

        match result {
            Ok(conversation) => {
                self.conversations.upsert(conversation);
                vec![Effect::Notify(SyncEvent::ConversationsUpdated)]
            }
            Err(e) => {
                warn!("Failed to load conversation {}: {}", ticket.conversation, e);
                Vec::new()
            }
        }
    }

    /// Replace the conversation list with a fresh fetch
    pub fn conversations_loaded(
        &mut self,
        result: Result<Vec<Conversation>, ApiError>,
    ) -> Vec<Effect> {
        self.loading_conversations = false;
        match result {
            Ok(conversations) => {
                debug!("Loaded {} conversations", conversations.len());
                self.conversations.replace_all(conversations);
                vec![Effect::Notify(SyncEvent::ConversationsUpdated)]
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                vec![Effect::Notify(SyncEvent::Error(format!(
                    "Failed to load conversations: {}",
                    e
                )))]
            }
        }
    }

    /// Outcome of a server-side mark-as-read
    pub fn mark_read_completed(
        &mut self,
        conversation: ConversationId,
        result: Result<(), ApiError>,
    ) -> Vec<Effect> {
        match result {
            Ok(()) => {
                debug!("Conversation {} marked read", conversation);
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to mark conversation {} read: {}", conversation, e);
                vec![Effect::Notify(SyncEvent::Error(format!(
                    "Failed to mark messages as read: {}",
                    e
                )))]
            }
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn is_connected(&self) -> bool {
        self.open_channel().is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.conversations.as_slice()
    }

    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.typing.users()
    }

    pub fn is_loading_history(&self) -> bool {
        self.loading_history
    }

    pub fn is_loading_conversations(&self) -> bool {
        self.loading_conversations
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            active_conversation: self.active,
            connected: self.is_connected(),
            messages: self.messages.clone(),
            typing: self.typing.users(),
            conversations: self.conversations.as_slice().to_vec(),
            loading_history: self.loading_history,
            loading_conversations: self.loading_conversations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_timestamp, User};
    use crate::sync::typing::TYPING_TIMEOUT;

    const ME: UserId = 1;
    const EVE_STARTS: &str = r#"{"type":"typing","user_id":5,"user_name":"Eve","status":"start"}"#;

    fn engine() -> SyncEngine {
        let user = User {
            id: ME,
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        };
        SyncEngine::new(Session::new("tok", user), TYPING_TIMEOUT)
    }

    fn opened_channel(effects: &[Effect]) -> ChannelId {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::OpenChannel { channel, .. } => Some(*channel),
                _ => None,
            })
            .expect("no OpenChannel effect")
    }

    fn history_ticket(effects: &[Effect]) -> Ticket {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::FetchHistory { ticket } => Some(*ticket),
                _ => None,
            })
            .expect("no FetchHistory effect")
    }

    /// Connect to a conversation and complete the socket open
    fn connected(engine: &mut SyncEngine, conversation: ConversationId) -> (ChannelId, Ticket) {
        let effects = engine.connect(conversation);
        let channel = opened_channel(&effects);
        let ticket = history_ticket(&effects);
        engine.channel_opened(channel);
        (channel, ticket)
    }

    fn message_frame(
        id: i64,
        sender: UserId,
        text: &str,
        timestamp: &str,
        conversation: ConversationId,
    ) -> String {
        serde_json::json!({
            "type": "message",
            "id": id,
            "sender_id": sender,
            "sender_name": "Bob",
            "message": text,
            "timestamp": timestamp,
            "is_read": false,
            "conversation_id": conversation,
        })
        .to_string()
    }

    fn metadata_ticket(effects: &[Effect]) -> Ticket {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::FetchConversation { ticket } => Some(*ticket),
                _ => None,
            })
            .expect("no FetchConversation effect")
    }

    fn peer(id: UserId, first_name: &str) -> User {
        User {
            id,
            email: format!("{}@example.com", first_name.to_lowercase()),
            first_name: first_name.to_string(),
            last_name: String::new(),
        }
    }

    fn history_record(id: i64, sender: UserId, text: &str, timestamp: &str) -> MessageRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "sender": sender,
            "sender_name": "Bob",
            "message": text,
            "timestamp": timestamp,
            "is_read": true,
        }))
        .unwrap()
    }

    fn conversation(id: ConversationId, time: &str) -> Conversation {
        Conversation {
            last_message: Some("earlier".to_string()),
            last_message_time: parse_timestamp(time),
            ..Conversation::new(id)
        }
    }

    /// Conversations 3 and 4, with 3 the more recent
    fn two_conversations() -> Vec<Conversation> {
        vec![
            conversation(3, "2024-05-01T09:00:00Z"),
            conversation(4, "2024-05-01T08:00:00Z"),
        ]
    }

    fn has_effect(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> bool {
        effects.iter().any(pred)
    }

    fn position(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> usize {
        effects.iter().position(pred).expect("effect not found")
    }

    #[test]
    fn test_connect_requires_token() {
        let mut engine = SyncEngine::new(Session::anonymous(), TYPING_TIMEOUT);
        assert!(engine.connect(3).is_empty());
        assert!(engine.active_conversation().is_none());
    }

    #[test]
    fn test_connect_opens_channel_and_marks_read_on_open() {
        let mut engine = engine();
        let effects = engine.connect(3);

        assert!(has_effect(&effects, |e| matches!(
            e,
            Effect::OpenChannel { conversation: 3, token, .. } if token == "tok"
        )));
        assert!(has_effect(&effects, |e| matches!(e, Effect::FetchHistory { .. })));
        assert!(!engine.is_connected());
        assert!(engine.is_loading_history());
        assert_eq!(engine.active_conversation(), Some(3));

        let effects = engine.channel_opened(opened_channel(&effects));
        assert!(engine.is_connected());
        assert!(has_effect(&effects, |e| matches!(e, Effect::MarkRead { conversation: 3 })));
    }

    #[test]
    fn test_connect_same_open_conversation_is_noop() {
        let mut engine = engine();
        connected(&mut engine, 3);
        assert!(engine.connect(3).is_empty());
        assert!(engine.is_connected());
    }

    #[test]
    fn test_reconnect_same_conversation_keeps_messages() {
        let mut engine = engine();
        let effects = engine.connect(3);
        let first = opened_channel(&effects);

        // Second connect while still opening replaces the pending socket
        let effects = engine.connect(3);
        assert!(has_effect(&effects, |e| *e == Effect::CloseChannel { channel: first }));
        assert!(!has_effect(&effects, |e| matches!(e, Effect::FetchHistory { .. })));

        // The superseded socket finishing its open is closed again
        let effects = engine.channel_opened(first);
        assert_eq!(effects, vec![Effect::CloseChannel { channel: first }]);
        assert!(!engine.is_connected());
    }

    #[test]
    fn test_duplicate_message_is_noop() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let now = Instant::now();

        engine.conversations_loaded(Ok(two_conversations()));
        let frame = message_frame(1, 2, "hi", "2024-05-01T10:00:00Z", 4);

        engine.handle_frame(channel, &frame, now);
        let before = engine.snapshot();

        let effects = engine.handle_frame(channel, &frame, now);
        assert!(effects.is_empty());
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.messages()[0].text, "hi");
    }

    #[test]
    fn test_message_without_id_dedups_on_sender_and_timestamp() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let now = Instant::now();
        let frame = serde_json::json!({
            "type": "message",
            "sender_id": 2,
            "message": "hey",
            "timestamp": "2024-05-01T10:00:00Z",
        })
        .to_string();

        engine.handle_frame(channel, &frame, now);
        engine.handle_frame(channel, &frame, now);

        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.messages()[0].key.as_str(), "2:2024-05-01T10:00:00Z");
        assert_eq!(engine.messages()[0].conversation_id, 3);
    }

    #[test]
    fn test_message_in_active_conversation_sends_receipt() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);

        let frame = message_frame(9, 2, "hi", "2024-05-01T10:00:00Z", 3);
        let effects = engine.handle_frame(channel, &frame, Instant::now());

        assert!(has_effect(&effects, |e| *e
            == Effect::Send {
                channel,
                message: ClientMessage::ReadReceipt {
                    message_id: MessageId::Number(9)
                }
            }));
        assert!(has_effect(&effects, |e| matches!(e, Effect::MarkRead { conversation: 3 })));
        assert!(engine.messages()[0].is_read);
        assert_eq!(engine.conversations()[0].unread_count, 0);
    }

    #[test]
    fn test_own_message_sends_no_receipt() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);

        let frame = message_frame(9, ME, "mine", "2024-05-01T10:00:00Z", 3);
        let effects = engine.handle_frame(channel, &frame, Instant::now());

        assert!(engine.messages()[0].is_sent_by_me);
        assert!(!has_effect(&effects, |e| matches!(e, Effect::Send { .. })));
        assert!(!has_effect(&effects, |e| matches!(e, Effect::MarkRead { .. })));
    }

    #[test]
    fn test_unread_counts_for_inactive_conversation() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        engine.conversations_loaded(Ok(two_conversations()));
        let now = Instant::now();

        let first = message_frame(1, 2, "a", "2024-05-01T10:00:00Z", 4);
        let second = message_frame(2, 2, "b", "2024-05-01T10:01:00Z", 4);
        engine.handle_frame(channel, &first, now);
        engine.handle_frame(channel, &second, now);
        engine.handle_frame(channel, &second, now);

        let conv = engine.conversations().iter().find(|c| c.id == 4).unwrap();
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.last_message.as_deref(), Some("b"));
        // Conversation 4 now has the newest activity
        assert_eq!(engine.conversations()[0].id, 4);

        engine.mark_as_read(4);
        let conv = engine.conversations().iter().find(|c| c.id == 4).unwrap();
        assert_eq!(conv.unread_count, 0);
    }

    #[test]
    fn test_typing_start_and_expiry() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let t0 = Instant::now();

        let effects = engine.handle_frame(channel, EVE_STARTS, t0);
        assert!(has_effect(&effects, |e| matches!(
            e,
            Effect::Notify(SyncEvent::TypingChanged(users)) if users.len() == 1
        )));
        assert_eq!(engine.next_typing_deadline(), Some(t0 + TYPING_TIMEOUT));

        assert!(engine.expire_typing(t0 + Duration::from_secs(2)).is_empty());
        assert_eq!(engine.typing_users().len(), 1);

        let effects = engine.expire_typing(t0 + TYPING_TIMEOUT);
        assert_eq!(effects, vec![Effect::Notify(SyncEvent::TypingChanged(Vec::new()))]);
        assert!(engine.typing_users().is_empty());
    }

    #[test]
    fn test_typing_refresh_does_not_flicker() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let t0 = Instant::now();

        engine.handle_frame(channel, EVE_STARTS, t0);
        engine.handle_frame(channel, EVE_STARTS, t0 + Duration::from_secs(2));

        // The first start's expiry would have fired here
        assert!(engine.expire_typing(t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(engine.typing_users()[0].user_id, 5);

        engine.expire_typing(t0 + Duration::from_secs(5));
        assert!(engine.typing_users().is_empty());
    }

    #[test]
    fn test_typing_stop_removes_immediately() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let t0 = Instant::now();

        let start = r#"{"type":"typing","user_id":5,"status":"start"}"#;
        engine.handle_frame(channel, start, t0);
        assert_eq!(engine.typing_users()[0].name, UNKNOWN_NAME);

        let stop = r#"{"type":"typing","user_id":5,"status":"stop"}"#;
        engine.handle_frame(channel, stop, t0);
        assert!(engine.typing_users().is_empty());
        assert!(engine.next_typing_deadline().is_none());
    }

    #[test]
    fn test_own_typing_is_ignored() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);

        let start = r#"{"type":"typing","user_id":1,"status":"start"}"#;
        let effects = engine.handle_frame(channel, start, Instant::now());
        assert!(effects.is_empty());
        assert!(engine.typing_users().is_empty());
    }

    #[test]
    fn test_read_receipt_flags_message() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let now = Instant::now();

        let mine = message_frame(7, ME, "mine", "2024-05-01T10:00:00Z", 3);
        engine.handle_frame(channel, &mine, now);
        assert!(!engine.messages()[0].is_read);

        engine.handle_frame(channel, r#"{"type":"read_receipt","message_id":7}"#, now);
        assert!(engine.messages()[0].is_read);

        // Unknown id is a no-op
        assert!(engine
            .handle_frame(channel, r#"{"type":"read_receipt","message_id":99}"#, now)
            .is_empty());
    }

    #[test]
    fn test_bad_frames_are_discarded() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);
        let now = Instant::now();

        assert!(engine.handle_frame(channel, "garbage", now).is_empty());
        assert!(engine.handle_frame(channel, r#"{"type":"presence"}"#, now).is_empty());
        assert!(engine.is_connected());
    }

    #[test]
    fn test_switch_conversation_resets_session() {
        let mut engine = engine();
        let (channel_a, ticket_a) = connected(&mut engine, 3);
        let now = Instant::now();

        let hi = message_frame(1, 2, "hi", "2024-05-01T10:00:00Z", 3);
        engine.handle_frame(channel_a, &hi, now);
        engine.handle_frame(channel_a, EVE_STARTS, now);

        let effects = engine.connect(4);
        assert!(has_effect(&effects, |e| *e == Effect::CloseChannel { channel: channel_a }));
        let close_pos = position(&effects, |e| matches!(e, Effect::CloseChannel { .. }));
        let open_pos = position(&effects, |e| {
            matches!(e, Effect::OpenChannel { conversation: 4, .. })
        });
        assert!(close_pos < open_pos);
        let channel_b = opened_channel(&effects);

        // Peers typing in the old conversation are cleared for the UI too
        assert!(has_effect(&effects, |e| *e
            == Effect::Notify(SyncEvent::TypingChanged(Vec::new()))));

        assert!(engine.messages().is_empty());
        assert!(engine.typing_users().is_empty());
        assert_eq!(engine.active_conversation(), Some(4));

        // Late history for the abandoned conversation is dropped
        let records = vec![history_record(1, 2, "hi", "2024-05-01T10:00:00Z")];
        assert!(engine.history_loaded(ticket_a, Ok(records)).is_empty());
        assert!(engine.messages().is_empty());

        // Frames from the old socket are dropped too
        let late = message_frame(2, 2, "late", "2024-05-01T10:05:00Z", 3);
        assert!(engine.handle_frame(channel_a, &late, now).is_empty());

        // Seen set was cleared: message 1 can be applied in the new session
        engine.channel_opened(channel_b);
        let hi_again = message_frame(1, 2, "hi", "2024-05-01T10:00:00Z", 4);
        engine.handle_frame(channel_b, &hi_again, now);
        assert_eq!(engine.messages().len(), 1);
    }

    #[test]
    fn test_switch_without_typing_peers_sends_no_typing_event() {
        let mut engine = engine();
        connected(&mut engine, 3);

        let effects = engine.connect(4);
        assert!(!has_effect(&effects, |e| matches!(
            e,
            Effect::Notify(SyncEvent::TypingChanged(_))
        )));
    }

    #[test]
    fn test_stale_conversation_metadata_is_discarded() {
        let mut engine = engine();
        let ticket_a = metadata_ticket(&engine.connect(3));
        engine.conversations_loaded(Ok(two_conversations()));

        let ticket_b = metadata_ticket(&engine.connect(4));
        let before = engine.conversations().to_vec();

        // Metadata for conversation 3 arrives after the switch to 4
        let late = Conversation {
            other_user: Some(peer(2, "Bob")),
            ..conversation(3, "2024-05-01T12:00:00Z")
        };
        assert!(engine.conversation_loaded(ticket_a, Ok(late)).is_empty());
        assert_eq!(engine.conversations(), before.as_slice());

        // Metadata for the active conversation is merged
        let current = Conversation {
            other_user: Some(peer(6, "Carol")),
            ..conversation(4, "2024-05-01T08:00:00Z")
        };
        let effects = engine.conversation_loaded(ticket_b, Ok(current));
        assert_eq!(effects, vec![Effect::Notify(SyncEvent::ConversationsUpdated)]);
        let conv = engine.conversations().iter().find(|c| c.id == 4).unwrap();
        assert_eq!(conv.title(), "Carol");
    }

    #[test]
    fn test_history_merges_before_live_messages() {
        let mut engine = engine();
        let (channel, ticket) = connected(&mut engine, 3);
        let now = Instant::now();

        let live = message_frame(3, 2, "live", "2024-05-01T10:02:00Z", 3);
        engine.handle_frame(channel, &live, now);

        let effects = engine.history_loaded(
            ticket,
            Ok(vec![
                history_record(1, 2, "first", "2024-05-01T10:00:00Z"),
                history_record(2, ME, "second", "2024-05-01T10:01:00Z"),
                history_record(3, 2, "live", "2024-05-01T10:02:00Z"),
            ]),
        );

        assert_eq!(
            effects,
            vec![Effect::Notify(SyncEvent::HistoryLoaded {
                conversation: 3,
                added: 2
            })]
        );
        let texts: Vec<&str> = engine.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "live"]);
        assert!(engine.messages()[1].is_sent_by_me);
        assert!(!engine.is_loading_history());
    }

    #[test]
    fn test_history_failure_clears_loading() {
        let mut engine = engine();
        let (_, ticket) = connected(&mut engine, 3);

        let effects = engine.history_loaded(
            ticket,
            Err(ApiError::Status {
                url: "http://localhost:8000/api/conversations/3/messages/".to_string(),
                status: 500,
            }),
        );

        assert!(matches!(effects.as_slice(), [Effect::Notify(SyncEvent::Error(_))]));
        assert!(!engine.is_loading_history());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn test_unexpected_close_clears_active() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);

        engine.channel_closed(channel);
        assert!(!engine.is_connected());
        assert!(engine.active_conversation().is_none());
        assert!(matches!(engine.send_message("hi"), Err(SyncError::NotConnected)));
        assert!(engine.typing_start().is_empty());
    }

    #[test]
    fn test_stale_close_does_not_disturb_new_channel() {
        let mut engine = engine();
        let (channel_a, _) = connected(&mut engine, 3);
        connected(&mut engine, 4);

        assert!(engine.channel_closed(channel_a).is_empty());
        assert!(engine.is_connected());
        assert_eq!(engine.active_conversation(), Some(4));
    }

    #[test]
    fn test_disconnect() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);

        let effects = engine.disconnect();
        assert!(has_effect(&effects, |e| *e == Effect::CloseChannel { channel }));
        assert!(!engine.is_connected());
        assert!(engine.active_conversation().is_none());

        // Reconnecting to the same conversation starts a fresh session
        let effects = engine.connect(3);
        assert!(has_effect(&effects, |e| matches!(e, Effect::FetchHistory { .. })));
    }

    #[test]
    fn test_outbound_intents() {
        let mut engine = engine();
        let (channel, _) = connected(&mut engine, 3);

        let effects = engine.send_message("hello").unwrap();
        assert_eq!(
            effects,
            vec![Effect::Send {
                channel,
                message: ClientMessage::Message {
                    message: "hello".to_string()
                }
            }]
        );
        assert!(engine.send_message("   ").unwrap().is_empty());

        assert_eq!(
            engine.typing_start(),
            vec![Effect::Send {
                channel,
                message: ClientMessage::TypingStart {
                    user_name: "Ada Lovelace".to_string()
                }
            }]
        );
        assert_eq!(
            engine.typing_stop(),
            vec![Effect::Send {
                channel,
                message: ClientMessage::TypingStop
            }]
        );
    }

    #[test]
    fn test_conversation_ranking() {
        let mut engine = engine();
        assert_eq!(engine.refresh_conversations(), vec![Effect::FetchConversations]);
        assert!(engine.is_loading_conversations());

        engine.conversations_loaded(Ok(vec![
            conversation(1, "2024-05-01T10:00:00Z"),
            conversation(2, "2024-05-01T11:00:00Z"),
        ]));

        let ids: Vec<ConversationId> = engine.conversations().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(!engine.is_loading_conversations());
    }

    #[test]
    fn test_conversations_failure_keeps_last_good_state() {
        let mut engine = engine();
        engine.conversations_loaded(Ok(vec![conversation(1, "2024-05-01T10:00:00Z")]));

        engine.refresh_conversations();
        let effects = engine.conversations_loaded(Err(ApiError::MissingToken));

        assert!(matches!(effects.as_slice(), [Effect::Notify(SyncEvent::Error(_))]));
        assert_eq!(engine.conversations().len(), 1);
        assert!(!engine.is_loading_conversations());
    }

    #[test]
    fn test_anonymous_session_suppresses_rest_calls() {
        let mut engine = SyncEngine::new(Session::anonymous(), TYPING_TIMEOUT);
        assert!(engine.refresh_conversations().is_empty());
        assert!(engine.mark_as_read(3).is_empty());
        assert!(!engine.is_loading_conversations());
    }
}
