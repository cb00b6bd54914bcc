//! Typing indicator tracking
//!
//! Each peer is either idle (absent) or typing (present with a deadline).
//! A `start` overwrites the peer's deadline, which cancels the previous
//! expiry for that peer; `expire` only removes entries whose own deadline
//! has passed, so a refreshed peer is never dropped by an older timer.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{TypingUser, UserId};

/// Default time a peer stays "typing" without a refresh
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
struct TypingPeer {
    name: String,
    deadline: Instant,
}

/// Set of peers currently typing in the active conversation
#[derive(Debug)]
pub struct TypingTracker {
    ttl: Duration,
    peers: BTreeMap<UserId, TypingPeer>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(TYPING_TIMEOUT)
    }
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            peers: BTreeMap::new(),
        }
    }

    /// Mark a peer as typing, replacing any pending expiry
    ///
    /// Returns `true` when the visible set changed (new peer or new name).
    pub fn start(&mut self, peer: UserId, name: impl Into<String>, now: Instant) -> bool {
        let name = name.into();
        let deadline = now + self.ttl;
        match self.peers.get_mut(&peer) {
            Some(entry) => {
                let renamed = entry.name != name;
                entry.name = name;
                entry.deadline = deadline;
                renamed
            }
            None => {
                self.peers.insert(peer, TypingPeer { name, deadline });
                true
            }
        }
    }

    /// Remove a peer immediately; returns `true` if it was typing
    pub fn stop(&mut self, peer: UserId) -> bool {
        self.peers.remove(&peer).is_some()
    }

    /// Drop every peer whose deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.peers.remove(id);
        }

        expired
    }

    /// Earliest pending expiry, if any peer is typing
    pub fn next_deadline(&self) -> Option<Instant> {
        self.peers.values().map(|entry| entry.deadline).min()
    }

    /// Peers currently typing, ordered by user id
    pub fn users(&self) -> Vec<TypingUser> {
        self.peers
            .iter()
            .map(|(id, entry)| TypingUser {
                user_id: *id,
                name: entry.name.clone(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
