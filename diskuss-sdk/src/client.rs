//! Connection manager for the message server.
//!
//! This is the main entry point for SDK consumers. It owns the TCP (and
//! optionally TLS) connection, performs the token handshake, and emits
//! [`Event`]s. Commands flow in through a [`ClientHandle`].
//!
//! ## Handshake
//!
//! The first frame on a new connection is `authenticate { token }` with a
//! bearer token minted by the HTTP login endpoint (see [`crate::api`]).
//! The server answers `auth_ok { user }` or `auth_failed { reason }` and,
//! on rejection, closes the connection. Commands issued before `auth_ok`
//! are queued and flushed once the handshake completes.
//!
//! ## Reconnection
//!
//! The protocol task does not reconnect on its own. Consumers either listen
//! for [`Event::Disconnected`] and call [`connect`] again, or use
//! [`run_with_reconnect`] which wraps the connect loop in exponential
//! backoff. Components re-issue their last request once the new channel
//! authenticates (see [`crate::session::Session`]).

use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::{self, ClientFrame, ServerFrame};
use crate::types::{DiscussionId, UserId};

/// Configuration for connecting to a message server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Bearer token from the HTTP login endpoint.
    pub token: String,
    /// Use TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7070".to_string(),
            token: String::new(),
            tls: false,
            tls_insecure: false,
        }
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    RequestDiscussions,
    RequestMessages {
        discussion_id: DiscussionId,
        limit: usize,
        offset: usize,
    },
    SendMessage {
        discussion_id: DiscussionId,
        recipient_id: UserId,
        text: String,
    },
    StartDiscussion {
        recipient_id: UserId,
    },
    Quit,
}

/// A handle to a running client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub(crate) fn channel(buffer: usize) -> (Self, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        (Self { cmd_tx }, cmd_rx)
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::Network("connection task has shut down".to_string()))
    }

    /// Ask for the full discussion list.
    pub async fn request_discussions(&self) -> Result<()> {
        self.send(Command::RequestDiscussions).await
    }

    /// Ask for one page of history.
    pub async fn request_messages(
        &self,
        discussion_id: DiscussionId,
        limit: usize,
        offset: usize,
    ) -> Result<()> {
        self.send(Command::RequestMessages { discussion_id, limit, offset })
            .await
    }

    /// Send a message. Fire-and-forget: the resulting `message_received`
    /// push is the only acknowledgement.
    pub async fn send_message(
        &self,
        discussion_id: DiscussionId,
        recipient_id: UserId,
        text: String,
    ) -> Result<()> {
        self.send(Command::SendMessage { discussion_id, recipient_id, text })
            .await
    }

    /// Create (or fetch) the discussion with `recipient_id`.
    pub async fn start_discussion(&self, recipient_id: UserId) -> Result<()> {
        self.send(Command::StartDiscussion { recipient_id }).await
    }

    /// Close the connection. Idempotent: safe to call when the connection
    /// is already down, in which case this is a no-op.
    pub async fn quit(&self) -> Result<()> {
        // A closed command channel means the protocol task is already gone.
        let _ = self.cmd_tx.send(Command::Quit).await;
        Ok(())
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// sent the handshake yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish TCP (and optionally TLS) connection to the server.
///
/// Done separately from [`connect_with_stream`] so connection errors are
/// reported to the caller directly instead of through the event channel.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    let use_tls = config.tls || config.server_addr.ends_with(":7443");
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr).await.map_err(|e| {
        Error::Network(format!("TCP connect to {} failed: {e}", config.server_addr))
    })?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if use_tls {
        let tls_config = if config.tls_insecure {
            tracing::debug!("TLS: insecure mode (skipping cert verification)");
            rustls_insecure_config()
        } else {
            rustls_default_config()
        };
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = config.server_addr.split(':').next().unwrap_or("localhost");
        let dns_name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::Network(format!("invalid server name {server_name}: {e}")))?;
        let tls_stream = connector.connect(dns_name, tcp).await.map_err(|e| {
            Error::Network(format!("TLS handshake with {} failed: {e}", config.server_addr))
        })?;
        tracing::debug!("TLS handshake complete");
        Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
    } else {
        Ok(EstablishedConnection::Plain(tcp))
    }
}

/// Connect using an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The protocol runs in a spawned task.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (handle, cmd_rx) = ClientHandle::channel(256);

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_protocol(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx)
                    .await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_protocol(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx)
                    .await
            }
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected { reason: e.to_string() })
                .await;
        }
    });

    (handle, event_rx)
}

/// Connect to a message server and run the client.
///
/// Convenience wrapper over [`establish_connection`] +
/// [`connect_with_stream`]; connection errors arrive as
/// [`Event::Disconnected`] instead of a direct `Err`.
pub fn connect(config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (handle, cmd_rx) = ClientHandle::channel(256);

    tokio::spawn(async move {
        let result = match establish_connection(&config).await {
            Ok(conn) => {
                let _ = event_tx.send(Event::Connected).await;
                match conn {
                    EstablishedConnection::Plain(tcp) => {
                        let (reader, writer) = tokio::io::split(tcp);
                        run_protocol(
                            BufReader::new(reader),
                            writer,
                            &config,
                            event_tx.clone(),
                            cmd_rx,
                        )
                        .await
                    }
                    EstablishedConnection::Tls(tls) => {
                        let (reader, writer) = tokio::io::split(*tls);
                        run_protocol(
                            BufReader::new(reader),
                            writer,
                            &config,
                            event_tx.clone(),
                            cmd_rx,
                        )
                        .await
                    }
                }
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected { reason: e.to_string() })
                .await;
        }
    });

    (handle, event_rx)
}

async fn run_protocol<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    // Handshake first; everything else waits for auth_ok.
    write_frame(&mut writer, &ClientFrame::Authenticate { token: config.token.clone() }).await?;

    let mut authenticated = false;
    let mut pending_commands: Vec<Command> = Vec::new();
    let mut line_buf = String::new();
    let mut last_activity = tokio::time::Instant::now();
    let ping_interval = tokio::time::Duration::from_secs(60);
    let ping_timeout = tokio::time::Duration::from_secs(120);

    loop {
        tokio::select! {
            result = reader.read_line(&mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                }

                last_activity = tokio::time::Instant::now();
                match protocol::decode(&line_buf) {
                    Ok(frame) => match frame {
                        ServerFrame::AuthOk { user } => {
                            authenticated = true;
                            let _ = event_tx.send(Event::Authenticated { user }).await;
                            // Flush commands queued before the handshake settled.
                            for cmd in pending_commands.drain(..) {
                                write_command(&mut writer, cmd).await?;
                            }
                        }
                        ServerFrame::AuthFailed { reason } => {
                            authenticated = false;
                            let _ = event_tx.send(Event::AuthFailed { reason }).await;
                            // The server closes the connection next; the EOF
                            // branch above turns that into Disconnected.
                        }
                        ServerFrame::DiscussionsSnapshot(discussions) => {
                            let _ = event_tx.send(Event::DiscussionsSnapshot { discussions }).await;
                        }
                        ServerFrame::MessagesPage(messages) => {
                            let _ = event_tx.send(Event::MessagesPage { messages }).await;
                        }
                        ServerFrame::MessageReceived(message) => {
                            let _ = event_tx.send(Event::MessageReceived { message }).await;
                        }
                        ServerFrame::DiscussionStarted(discussion) => {
                            let _ = event_tx.send(Event::DiscussionStarted { discussion }).await;
                        }
                        ServerFrame::Error { message } => {
                            let _ = event_tx.send(Event::ServerError { message }).await;
                        }
                        ServerFrame::Ping => {
                            write_frame(&mut writer, &ClientFrame::Pong).await?;
                        }
                        ServerFrame::Pong => {}
                    },
                    Err(e) => {
                        // Malformed frame: drop it, keep the connection.
                        tracing::warn!(error = %e, line = line_buf.trim_end(), "Dropping bad frame");
                    }
                }

                line_buf.clear();
            }
            Some(cmd) = cmd_rx.recv() => {
                if matches!(cmd, Command::Quit) {
                    let _ = event_tx.send(Event::Disconnected { reason: "client quit".to_string() }).await;
                    break;
                }
                if authenticated {
                    write_command(&mut writer, cmd).await?;
                } else {
                    // Queue until authenticated — commands silently wait.
                    pending_commands.push(cmd);
                }
            }
            // Periodic client-to-server ping and dead-peer detection.
            _ = tokio::time::sleep_until(last_activity + ping_interval) => {
                if last_activity.elapsed() > ping_timeout {
                    let _ = event_tx.send(Event::Disconnected { reason: "ping timeout".to_string() }).await;
                    break;
                }
                write_frame(&mut writer, &ClientFrame::Ping).await?;
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &ClientFrame) -> Result<()> {
    writer.write_all(protocol::encode(frame).as_bytes()).await?;
    Ok(())
}

/// Put a single command on the wire.
async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, cmd: Command) -> Result<()> {
    let frame = match cmd {
        Command::RequestDiscussions => ClientFrame::RequestDiscussions,
        Command::RequestMessages { discussion_id, limit, offset } => {
            ClientFrame::RequestMessages { discussion_id, limit, offset }
        }
        Command::SendMessage { discussion_id, recipient_id, text } => {
            ClientFrame::SendMessage { discussion_id, recipient_id, text }
        }
        Command::StartDiscussion { recipient_id } => {
            ClientFrame::StartDiscussion { recipient_id }
        }
        Command::Quit => return Ok(()),
    };
    write_frame(writer, &frame).await
}

fn install_crypto_provider() {
    // ring works on more targets; aws-lc-rs is the default on desktop.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let mut root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    // Also trust whatever the platform trusts (corporate CAs etc.).
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = root_store.add(cert);
    }
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

// ── Reconnect helper ──

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt.
    pub initial_delay: std::time::Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: std::time::Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: std::time::Duration::from_secs(2),
            max_delay: std::time::Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Run an event loop with automatic reconnection.
///
/// The `handler` is called for each event. When disconnected, the loop
/// reconnects with exponential backoff. An `auth_failed` handshake is
/// terminal: the token is dead and retrying cannot fix it, so the loop
/// returns `Error::Auth`.
pub async fn run_with_reconnect<F>(
    config: ConnectConfig,
    reconnect_config: ReconnectConfig,
    handler: F,
) -> Result<()>
where
    F: Fn(
            ClientHandle,
            Event,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
{
    let mut delay = reconnect_config.initial_delay;
    let mut consecutive_failures = 0u32;

    loop {
        let conn = match establish_connection(&config).await {
            Ok(c) => {
                consecutive_failures = 0;
                delay = reconnect_config.initial_delay;
                c
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    attempt = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, &reconnect_config);
                continue;
            }
        };

        let (handle, mut events) = connect_with_stream(conn, config.clone());

        let mut disconnected = false;
        let mut auth_rejected: Option<String> = None;
        while let Some(event) = events.recv().await {
            if let Event::AuthFailed { reason } = &event {
                auth_rejected = Some(reason.clone());
            }
            if matches!(&event, Event::Disconnected { .. }) {
                disconnected = true;
            }
            if let Err(e) = handler(handle.clone(), event).await {
                tracing::error!(error = %e, "Handler error");
                // Non-fatal: continue processing
            }
            if disconnected {
                break;
            }
        }

        if let Some(reason) = auth_rejected {
            return Err(Error::Auth(reason));
        }

        tracing::info!(delay_secs = delay.as_secs(), "Disconnected, will reconnect");
        tokio::time::sleep(delay).await;
        delay = next_delay(delay, &reconnect_config);
    }
}

/// Exponential backoff with jitter, capped at `max_delay`.
fn next_delay(delay: std::time::Duration, config: &ReconnectConfig) -> std::time::Duration {
    let jitter = rand_jitter(delay.as_millis() as u64 / 4);
    std::time::Duration::from_millis(
        ((delay.as_millis() as f64 * config.backoff_factor) as u64 + jitter)
            .min(config.max_delay.as_millis() as u64),
    )
}

fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}
