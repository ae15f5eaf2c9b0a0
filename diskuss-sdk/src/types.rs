//! Entities shared across the SDK: users, discussions, messages.
//!
//! All of these are created server-side; the client only receives and
//! caches them. Timestamps travel as RFC 3339 strings and are held as UTC.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Server-assigned opaque discussion identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscussionId(pub String);

/// Server-assigned opaque message identifier.
///
/// Also the total-order tie-break when two messages carry the same
/// timestamp, so log order is deterministic under any arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for DiscussionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for DiscussionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity reference for a participant. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// A single message. Created once by its sender, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub discussion_id: DiscussionId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Ordering key for the message log: timestamp, then id.
    pub fn sort_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.timestamp, &self.id)
    }
}

/// A conversation among a fixed set of participants.
///
/// `last_message` is a denormalized copy of the most recent message, kept
/// for sidebar display; [`crate::directory::DiscussionDirectory`] updates
/// it monotonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: DiscussionId,
    pub participants: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
}

impl Discussion {
    /// Look up a participant by id.
    pub fn participant(&self, id: &UserId) -> Option<&User> {
        self.participants.iter().find(|u| &u.id == id)
    }

    /// The counterpart in a two-party discussion: the first participant
    /// whose id differs from `me`.
    pub fn other_participant(&self, me: &UserId) -> Option<&User> {
        self.participants.iter().find(|u| &u.id != me)
    }
}

/// State of the session's one connection to the message server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport up or in progress, handshake not yet accepted.
    Connecting,
    /// Handshake accepted; the channel is live.
    Connected,
    /// Channel closed; a reconnect may follow.
    Disconnected,
    /// The server rejected the credential. Requires re-authentication.
    Failed,
}
