//! Conversation list ordering
//!
//! Keeps the sidebar list sorted by most recent activity and maintains the
//! unread counters as messages arrive.

use crate::models::{Conversation, ConversationId, Message};

/// Conversation list, always sorted newest first
#[derive(Debug, Default)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list (fresh REST fetch)
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.items = conversations;
        self.sort();
    }

    /// Merge metadata for a single conversation
    ///
    /// An existing entry keeps its snapshot and unread counter; only the
    /// participant is refreshed. Unknown conversations are added as-is.
    pub fn upsert(&mut self, conversation: Conversation) {
        match self.items.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => {
                if conversation.other_user.is_some() {
                    existing.other_user = conversation.other_user;
                }
                if existing.last_message_time.is_none() {
                    existing.last_message = conversation.last_message;
                    existing.last_message_time = conversation.last_message_time;
                }
            }
            None => self.items.push(conversation),
        }
        self.sort();
    }

    /// Fold a newly applied message into its conversation's snapshot
    ///
    /// Unread goes up by one for another user's message in a conversation
    /// that is not `active`, stays put while the conversation is active, and
    /// resets when the current user is the sender.
    pub fn apply_latest_message(&mut self, message: &Message, active: Option<ConversationId>) {
        let index = match self.items.iter().position(|c| c.id == message.conversation_id) {
            Some(index) => index,
            None => {
                self.items.push(Conversation::new(message.conversation_id));
                self.items.len() - 1
            }
        };

        let conversation = &mut self.items[index];
        conversation.last_message = Some(message.text.clone());
        conversation.last_message_time = message.sent_at;

        if message.is_sent_by_me {
            conversation.unread_count = 0;
        } else if active != Some(message.conversation_id) {
            conversation.unread_count += 1;
        }

        self.sort();
    }

    /// Zero the unread counter; returns `false` for an unknown conversation
    pub fn mark_read(&mut self, id: ConversationId) -> bool {
        match self.items.iter_mut().find(|c| c.id == id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn as_slice(&self) -> &[Conversation] {
        &self.items
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }

    // Stable: equal (or missing) times keep their relative order.
    // `None` compares below every time, so empty conversations sink.
    fn sort(&mut self) {
        self.items
            .sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    }
}
