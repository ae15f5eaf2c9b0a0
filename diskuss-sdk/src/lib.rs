//! Client SDK for the diskuss messaging service.
//!
//! The SDK keeps a client's view of its discussions synchronized with the
//! message server over one persistent bidirectional connection:
//!
//! - [`client`] owns the connection lifecycle: handshake, keepalive,
//!   teardown, and an optional reconnect loop with backoff.
//! - [`protocol`] is the typed event vocabulary carried on the wire.
//! - [`directory`] caches the discussion list for sidebar display.
//! - [`stream`] is the active discussion's message log: backward
//!   pagination plus live append, de-duplicated and strictly ordered.
//! - [`session`] ties the above to one authenticated user and routes every
//!   incoming event through a single handler.
//! - [`api`] wraps the HTTP account endpoints (login, user search,
//!   discussion creation) that sit outside the live channel.
//!
//! ```no_run
//! use diskuss_sdk::api::ApiClient;
//! use diskuss_sdk::client::ConnectConfig;
//! use diskuss_sdk::session::Session;
//!
//! # async fn example() -> diskuss_sdk::Result<()> {
//! let api = ApiClient::new("https://api.example.com");
//! let auth = api.authenticate("alice", "hunter2").await?;
//!
//! let mut session = Session::new(auth.user, auth.token);
//! let mut events = session
//!     .connect(ConnectConfig {
//!         server_addr: "chat.example.com:7443".to_string(),
//!         tls: true,
//!         ..Default::default()
//!     })
//!     .await?;
//! while let Some(event) = events.recv().await {
//!     session.handle_event(event).await;
//! }
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod directory;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
