//! Wire vocabulary for the dispatch protocol.
//!
//! Frames are newline-delimited JSON, tagged by event name:
//! `{"type": "request_messages", "data": {...}}`. There are no per-request
//! correlation identifiers — the most recent request of a given name wins,
//! and the receiving component discards a response it no longer expects
//! (see [`crate::stream::MessageStream`]).
//!
//! A frame that fails to parse is a protocol violation: the caller logs it
//! and drops it. It never tears the connection down.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Discussion, DiscussionId, Message, User, UserId};

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake. Must be the first frame on a new connection.
    Authenticate { token: String },
    /// Ask for the full discussion list. Answered by `discussions_snapshot`.
    RequestDiscussions,
    /// Ask for one page of history, newest-first from `offset`.
    /// Answered by `messages_page`.
    RequestMessages {
        discussion_id: DiscussionId,
        limit: usize,
        offset: usize,
    },
    /// Fire-and-forget send. The server persists the message and fans it
    /// out as a `message_received` push to every participant, the sender
    /// included — the push is the only path into the local log.
    SendMessage {
        discussion_id: DiscussionId,
        recipient_id: UserId,
        text: String,
    },
    /// Create (or fetch) the discussion with `recipient_id`. Answered by
    /// `discussion_started`.
    StartDiscussion { recipient_id: UserId },
    /// Keepalive.
    Ping,
    /// Answer to a server `ping`.
    Pong,
}

/// Frames the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; `user` is the authenticated profile.
    AuthOk { user: User },
    /// Handshake rejected. The server closes the connection afterwards.
    AuthFailed { reason: String },
    /// Full replacement for the discussion list.
    DiscussionsSnapshot(Vec<Discussion>),
    /// One page of history for the most recent `request_messages`.
    MessagesPage(Vec<Message>),
    /// Unsolicited push of a newly created message.
    MessageReceived(Message),
    /// The discussion created or fetched by `start_discussion`.
    DiscussionStarted(Discussion),
    /// Application-level error report. The triggering request is dropped.
    Error { message: String },
    /// Keepalive.
    Ping,
    /// Answer to a client `ping`.
    Pong,
}

/// Encode a client frame as one wire line, trailing newline included.
pub fn encode(frame: &ClientFrame) -> String {
    // ClientFrame contains no map keys or non-string values that can fail
    // to serialize, so this cannot panic in practice.
    let mut line = serde_json::to_string(frame).expect("frame serialization");
    line.push('\n');
    line
}

/// Decode one wire line into a server frame.
pub fn decode(line: &str) -> Result<ServerFrame> {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return Err(Error::Protocol("empty frame".to_string()));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| Error::Protocol(format!("bad frame: {e}")))
}
