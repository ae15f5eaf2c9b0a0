//! Console chat example — log in, pick a discussion, talk.
//!
//! Usage:
//!   cargo run --example console_chat -- --api-url http://localhost:5000 \
//!     --server localhost:7070 --username alice --password hunter2
//!
//! Commands at the prompt:
//!   /list            show discussions, most recently active first
//!   /open <n>        open discussion number <n> from /list
//!   /older           load one more page of history
//!   /start <name>    start a discussion with a user by username
//!   /quit            disconnect and exit
//!   anything else    send as a message to the open discussion

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use diskuss_sdk::api::ApiClient;
use diskuss_sdk::client::ConnectConfig;
use diskuss_sdk::event::Event;
use diskuss_sdk::session::Session;
use diskuss_sdk::types::DiscussionId;

#[derive(Parser)]
#[command(name = "console-chat", about = "Diskuss console chat example")]
struct Args {
    /// Account API base URL.
    #[arg(long, default_value = "http://localhost:5000")]
    api_url: String,
    /// Message server address (host:port).
    #[arg(long, default_value = "localhost:7070")]
    server: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    tls: bool,
    /// Skip TLS certificate verification (self-signed dev servers).
    #[arg(long)]
    tls_insecure: bool,
    #[arg(long, default_value_t = 20)]
    page_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let api = ApiClient::new(args.api_url.clone());
    let auth = api.authenticate(&args.username, &args.password).await?;
    let api = api.with_token(auth.token.clone());
    println!("logged in as @{}", auth.user.username);

    let me = auth.user.id.clone();
    let mut session = Session::new(auth.user, auth.token).with_page_size(args.page_size);
    let mut events = session
        .connect(ConnectConfig {
            server_addr: args.server.clone(),
            tls: args.tls,
            tls_insecure: args.tls_insecure,
            ..Default::default()
        })
        .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    println!("connection task ended");
                    break;
                };
                match &event {
                    Event::Authenticated { user } => println!("connected as @{}", user.username),
                    Event::AuthFailed { reason } => println!("auth failed: {reason}"),
                    Event::MessageReceived { message } => {
                        let who = if message.sender_id == me { "me" } else { "them" };
                        println!("[{}] {who}: {}", message.timestamp.format("%H:%M:%S"), message.text);
                    }
                    Event::MessagesPage { .. } => {
                        // Re-print the log after the merge below.
                    }
                    Event::Disconnected { reason } => println!("disconnected: {reason}"),
                    _ => {}
                }
                let reprint = matches!(&event, Event::MessagesPage { .. });
                session.handle_event(event).await;
                if reprint {
                    for m in session.stream().messages() {
                        let who = if m.sender_id == me { "me" } else { "them" };
                        println!("[{}] {who}: {}", m.timestamp.format("%H:%M:%S"), m.text);
                    }
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if let Err(e) = run_command(&mut session, &api, &me, line).await {
                    println!("error: {e}");
                }
                if line == "/quit" {
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

async fn run_command(
    session: &mut Session,
    api: &ApiClient,
    me: &diskuss_sdk::types::UserId,
    line: &str,
) -> Result<()> {
    if line == "/quit" || line.is_empty() {
        return Ok(());
    }
    if line == "/list" {
        for (n, d) in session.directory().ordered().iter().enumerate() {
            let who = d
                .other_participant(me)
                .map(|u| u.username.as_str())
                .unwrap_or("?");
            match &d.last_message {
                Some(m) => println!("{n}: @{who} — {}", m.text),
                None => println!("{n}: @{who}"),
            }
        }
        return Ok(());
    }
    if let Some(n) = line.strip_prefix("/open ") {
        let n: usize = n.trim().parse()?;
        let id: Option<DiscussionId> =
            session.directory().ordered().get(n).map(|d| d.id.clone());
        match id {
            Some(id) => session.select_discussion(&id).await?,
            None => println!("no discussion {n}; try /list"),
        }
        return Ok(());
    }
    if line == "/older" {
        session.load_older().await?;
        return Ok(());
    }
    if let Some(name) = line.strip_prefix("/start ") {
        let candidates = api.search_users(name.trim()).await?;
        match candidates.iter().find(|u| &u.id != me) {
            Some(user) => session.start_discussion(user.id.clone()).await?,
            None => println!("no user matching {name}"),
        }
        return Ok(());
    }
    session.send_message(line).await?;
    Ok(())
}
