//! Error taxonomy for the SDK.

use thiserror::Error;

use crate::types::DiscussionId;

/// Errors surfaced by the SDK.
///
/// All of these are session-local and recoverable: `Auth` by logging in
/// again, `Network` by reconnecting, `NotFound` by refreshing the
/// discussion list. `Protocol` is reported for malformed frames, which are
/// logged and dropped rather than tearing the connection down.
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected the session credential. Terminal for the
    /// session; the caller must re-authenticate.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Transport-level failure (connect, read, write, or HTTP).
    #[error("network failure: {0}")]
    Network(String),

    /// Malformed or unexpected payload on the wire.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The operation referenced a discussion the directory does not hold.
    #[error("unknown discussion {0}")]
    NotFound(DiscussionId),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
