//! Session wiring: one authenticated user, one live connection, and the
//! state the connection feeds.
//!
//! The session owns the [`ClientHandle`] and injects it wherever a request
//! must be put on the wire — there is no module-level connection singleton.
//! All incoming traffic is routed through [`Session::handle_event`], one
//! event at a time on the consumer's own timeline, so the directory and the
//! stream are mutated without any locking.

use tokio::sync::mpsc;

use crate::client::{self, ClientHandle, ConnectConfig};
use crate::directory::DiscussionDirectory;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::stream::{MessageStream, PageRequest, DEFAULT_PAGE_SIZE};
use crate::types::{ConnectionState, DiscussionId, User, UserId};

/// A logged-in user's live view of the messaging service.
pub struct Session {
    user: User,
    token: String,
    handle: Option<ClientHandle>,
    state: ConnectionState,
    directory: DiscussionDirectory,
    stream: MessageStream,
    page_size: usize,
}

impl Session {
    /// Create a session for `user`, authenticated by `token` (both from
    /// the HTTP login endpoint, see [`crate::api`]).
    pub fn new(user: User, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
            handle: None,
            state: ConnectionState::Disconnected,
            directory: DiscussionDirectory::new(),
            stream: MessageStream::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// History page size for subsequent discussion activations.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn directory(&self) -> &DiscussionDirectory {
        &self.directory
    }

    pub fn stream(&self) -> &MessageStream {
        &self.stream
    }

    /// Open the session's connection, tearing down any previous one first —
    /// never two channels for the same session. `config.token` is replaced
    /// by the session's own credential.
    ///
    /// The caller drives the returned receiver and feeds every event back
    /// through [`Session::handle_event`].
    pub async fn connect(&mut self, mut config: ConnectConfig) -> Result<mpsc::Receiver<Event>> {
        self.disconnect().await;

        config.token = self.token.clone();
        let conn = client::establish_connection(&config).await?;
        let (handle, events) = client::connect_with_stream(conn, config);
        self.handle = Some(handle);
        self.state = ConnectionState::Connecting;
        Ok(events)
    }

    /// Adopt an already-connected handle (useful when the consumer manages
    /// the connect loop itself, e.g. via [`client::run_with_reconnect`]).
    pub fn attach(&mut self, handle: ClientHandle) {
        self.handle = Some(handle);
        self.state = ConnectionState::Connecting;
    }

    /// Release the channel. Idempotent; must be called when the session
    /// ends so no connection leaks across session changes.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.quit().await;
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Route one incoming event into the session state.
    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected => {
                self.state = ConnectionState::Connecting;
            }
            Event::Authenticated { user } => {
                self.state = ConnectionState::Connected;
                self.user = user;
                // The previous channel's in-flight requests died with it;
                // re-issue ours now that the new channel is live.
                self.issue_request_discussions().await;
                if let Some(req) = self.stream.refresh() {
                    self.issue_page_request(req).await;
                }
            }
            Event::AuthFailed { reason } => {
                self.state = ConnectionState::Failed;
                tracing::warn!(reason = %reason, "Authentication rejected");
            }
            Event::DiscussionsSnapshot { discussions } => {
                self.directory.replace(discussions);
            }
            Event::MessagesPage { messages } => {
                self.stream.apply_page(messages);
            }
            Event::MessageReceived { message } => {
                // The sidebar cache tracks every discussion; the log only
                // the active one.
                self.stream.apply_push(&message);
                self.directory.upsert_from_message(&message);
            }
            Event::DiscussionStarted { discussion } => {
                self.directory.upsert(discussion);
            }
            Event::ServerError { message } => {
                tracing::warn!(message = %message, "Server reported an error");
            }
            Event::Disconnected { reason } => {
                tracing::info!(reason = %reason, "Connection closed");
                if self.state != ConnectionState::Failed {
                    self.state = ConnectionState::Disconnected;
                }
                self.stream.on_disconnect();
            }
        }
    }

    /// Request a fresh discussion snapshot.
    pub async fn refresh_discussions(&self) -> Result<()> {
        self.handle()?.request_discussions().await
    }

    /// Make a discussion active and request its first page of history.
    pub async fn select_discussion(&mut self, id: &DiscussionId) -> Result<()> {
        self.directory.select(id)?;
        let req = self.stream.activate(id.clone(), self.page_size);
        let handle = self.handle()?;
        handle
            .request_messages(req.discussion_id, req.limit, req.offset)
            .await
    }

    /// Extend the active discussion's history backward by one page.
    /// No-op while another history request is outstanding.
    pub async fn load_older(&mut self) -> Result<()> {
        let Some(req) = self.stream.load_older() else {
            return Ok(());
        };
        self.issue_page_request(req).await;
        Ok(())
    }

    /// Send `text` to the counterpart in the active discussion.
    ///
    /// Silently a no-op when the text is blank after trimming. The message
    /// is not added to the log here: it appears when the server's
    /// `message_received` push comes back, the single source of truth for
    /// its identity and ordering.
    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let Some(active) = self.directory.active() else {
            tracing::warn!("Send with no active discussion, ignoring");
            return Ok(());
        };
        let Some(recipient) = active.other_participant(&self.user.id) else {
            tracing::warn!(discussion = %active.id, "Discussion has no counterpart, ignoring send");
            return Ok(());
        };
        let recipient_id = recipient.id.clone();

        let Some(req) = self.stream.prepare_send(text, &recipient_id) else {
            return Ok(());
        };
        let handle = self.handle()?;
        handle
            .send_message(req.discussion_id, req.recipient_id, req.text)
            .await?;
        // A sidebar refresh rides along with every send; the snapshot keeps
        // `last_message` honest even if a push for a foreign discussion was
        // missed.
        handle.request_discussions().await
    }

    /// Ask the server for the discussion with `recipient_id`, creating it
    /// if needed. The reply arrives as [`Event::DiscussionStarted`].
    pub async fn start_discussion(&self, recipient_id: UserId) -> Result<()> {
        self.handle()?.start_discussion(recipient_id).await
    }

    fn handle(&self) -> Result<&ClientHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Network("session has no live connection".to_string()))
    }

    async fn issue_request_discussions(&self) {
        if let Some(handle) = &self.handle
            && let Err(e) = handle.request_discussions().await
        {
            tracing::debug!(error = %e, "Could not re-issue discussion request");
        }
    }

    async fn issue_page_request(&self, req: PageRequest) {
        if let Some(handle) = &self.handle
            && let Err(e) = handle
                .request_messages(req.discussion_id, req.limit, req.offset)
                .await
        {
            tracing::debug!(error = %e, "Could not issue history request");
        }
    }
}
