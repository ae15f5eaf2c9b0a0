//! Events emitted by the client for the session layer to consume.

use crate::types::{Discussion, Message, User};

/// Events that the SDK emits to the consumer (session, TUI, bot, etc.)
///
/// Incoming protocol traffic is surfaced as one tagged-variant type so the
/// consumer dispatches everything through a single handler; the stale-page
/// discard rule lives in one guarded match instead of scattered listeners.
#[derive(Debug, Clone)]
pub enum Event {
    /// Transport established; the handshake has been sent.
    Connected,

    /// The server accepted the credential. `user` is our profile.
    Authenticated { user: User },

    /// The server rejected the credential. Terminal for this session; the
    /// server closes the connection next.
    AuthFailed { reason: String },

    /// Full replacement for the discussion list.
    DiscussionsSnapshot { discussions: Vec<Discussion> },

    /// One page of history for the most recent `request_messages`.
    MessagesPage { messages: Vec<Message> },

    /// Unsolicited push of a newly created message. Arrives on every
    /// participant's connection, the sender's included.
    MessageReceived { message: Message },

    /// The discussion created or fetched by `start_discussion`.
    DiscussionStarted { discussion: Discussion },

    /// Application-level error report from the server.
    ServerError { message: String },

    /// Connection closed. All in-flight requests on it are abandoned.
    Disconnected { reason: String },
}
