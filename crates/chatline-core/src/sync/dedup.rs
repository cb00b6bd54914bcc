//! Seen-message index
//!
//! Remembers which message identities have already been applied during the
//! current conversation session, so re-deliveries (history overlap, server
//! echoes, reconnect replays) are absorbed.

use std::collections::HashSet;

use crate::models::MessageKey;

/// Session-scoped set of applied message identities
#[derive(Debug, Default)]
pub struct SeenMessages {
    keys: HashSet<MessageKey>,
}

impl SeenMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key; returns `false` if it was already seen
    pub fn insert(&mut self, key: MessageKey) -> bool {
        self.keys.insert(key)
    }

    /// Forget everything (conversation switch or history clear)
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;

    #[test]
    fn test_insert_reports_duplicates() {
        let mut seen = SeenMessages::new();
        let key = MessageKey::derive(Some(&MessageId::Number(1)), 2, "T1");

        assert!(seen.insert(key.clone()));
        assert!(!seen.insert(key));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_fallback_keys_distinguish_timestamps() {
        let mut seen = SeenMessages::new();
        assert!(seen.insert(MessageKey::derive(None, 2, "T1")));
        assert!(seen.insert(MessageKey::derive(None, 2, "T2")));
        assert!(!seen.insert(MessageKey::derive(None, 2, "T1")));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut seen = SeenMessages::new();
        let key = MessageKey::derive(None, 2, "T1");
        seen.insert(key.clone());
        seen.clear();

        assert!(seen.is_empty());
        assert!(seen.insert(key));
    }
}
