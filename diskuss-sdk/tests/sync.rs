//! End-to-end synchronization tests: the real client against an
//! in-process fake server on a loopback listener.
//!
//! Tests cover:
//! - Handshake, snapshot load, history page plus live push ordering
//! - Rejected credentials as a terminal session state
//! - Blank sends never reaching the wire
//! - Duplicate pushes logged exactly once
//! - A stale history response discarded after switching discussions

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use diskuss_sdk::client::ConnectConfig;
use diskuss_sdk::event::Event;
use diskuss_sdk::session::Session;
use diskuss_sdk::stream::StreamState;
use diskuss_sdk::types::{ConnectionState, User};

const TOKEN: &str = "tok-1";

fn alice() -> User {
    User { id: "u1".into(), username: "alice".to_string() }
}

fn user_json(id: &str, name: &str) -> Value {
    json!({ "id": id, "username": name })
}

fn discussion_json(id: &str) -> Value {
    json!({
        "id": id,
        "participants": [user_json("u1", "alice"), user_json("u2", "bob")],
    })
}

fn message_json(id: &str, discussion: &str, ts: &str, text: &str) -> Value {
    json!({
        "id": id,
        "discussion_id": discussion,
        "sender_id": "u2",
        "recipient_id": "u1",
        "text": text,
        "timestamp": ts,
    })
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

struct FakeServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl FakeServer {
    /// Accept one connection and complete the token handshake.
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, write) = stream.into_split();
        let mut server = Self { lines: BufReader::new(read).lines(), write };

        let auth = server.read_frame().await.unwrap();
        assert_eq!(auth["type"], "authenticate");
        assert_eq!(auth["data"]["token"], TOKEN);
        server
            .send(json!({ "type": "auth_ok", "data": { "user": user_json("u1", "alice") } }))
            .await;
        server
    }

    /// Next frame from the client, with keepalives answered transparently.
    async fn read_frame(&mut self) -> Option<Value> {
        loop {
            let line = self.lines.next_line().await.unwrap()?;
            let v: Value = serde_json::from_str(&line).unwrap();
            if v["type"] == "ping" {
                self.send(json!({ "type": "pong" })).await;
                continue;
            }
            return Some(v);
        }
    }

    async fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.write.write_all(line.as_bytes()).await.unwrap();
    }

    /// Drain whatever the client still sends until it hangs up.
    async fn run_to_eof(mut self) {
        while self.read_frame().await.is_some() {}
    }
}

async fn connect_session(addr: SocketAddr) -> (Session, mpsc::Receiver<Event>) {
    let mut session = Session::new(alice(), TOKEN).with_page_size(5);
    let events = session
        .connect(ConnectConfig { server_addr: addr.to_string(), ..Default::default() })
        .await
        .unwrap();
    (session, events)
}

/// Pump events into the session until `done` holds.
async fn drive_until<F>(session: &mut Session, events: &mut mpsc::Receiver<Event>, done: F)
where
    F: Fn(&Session) -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !done(session) {
            let event = events.recv().await.expect("event channel closed early");
            session.handle_event(event).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn snapshot_page_and_push_end_to_end() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut server = FakeServer::accept(&listener).await;

        // The session issues its snapshot request on authentication.
        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_discussions");
        server
            .send(json!({ "type": "discussions_snapshot", "data": [discussion_json("d1")] }))
            .await;

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_messages");
        assert_eq!(frame["data"]["discussion_id"], "d1");
        assert_eq!(frame["data"]["limit"], 5);
        assert_eq!(frame["data"]["offset"], 0);
        server
            .send(json!({ "type": "messages_page", "data": [
                message_json("m1", "d1", "2025-03-01T12:00:10Z", "first"),
                message_json("m2", "d1", "2025-03-01T12:00:15Z", "second"),
            ]}))
            .await;
        // A push that predates the loaded page must still sort first.
        server
            .send(json!({ "type": "message_received",
                "data": message_json("m0", "d1", "2025-03-01T12:00:00Z", "earliest") }))
            .await;

        server.run_to_eof().await;
    });

    let (mut session, mut events) = connect_session(addr).await;

    drive_until(&mut session, &mut events, |s| !s.directory().is_empty()).await;
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    session.select_discussion(&"d1".into()).await.unwrap();
    drive_until(&mut session, &mut events, |s| s.stream().len() == 3).await;

    let ids: Vec<&str> = session.stream().messages().iter().map(|m| m.id.0.as_str()).collect();
    assert_eq!(ids, vec!["m0", "m1", "m2"]);
    // The sidebar cache follows the newest entry of the active log.
    let last = session.directory().get(&"d1".into()).unwrap().last_message.as_ref().unwrap();
    assert_eq!(last.id, "m2".into());

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_credential_is_terminal() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let line = lines.next_line().await.unwrap().unwrap();
        let auth: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(auth["type"], "authenticate");
        let frame = json!({ "type": "auth_failed", "data": { "reason": "expired token" } });
        write
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
        // Rejection closes the connection from the server side.
        drop(write);
    });

    let (mut session, mut events) = connect_session(addr).await;
    drive_until(&mut session, &mut events, |s| {
        s.connection_state() == ConnectionState::Failed
    })
    .await;

    // The EOF that follows must not mask the failure.
    while let Ok(Some(event)) =
        timeout(Duration::from_secs(5), events.recv()).await.map_err(|_| ())
    {
        session.handle_event(event).await;
    }
    assert_eq!(session.connection_state(), ConnectionState::Failed);
    server.await.unwrap();
}

#[tokio::test]
async fn blank_send_never_reaches_the_wire() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut server = FakeServer::accept(&listener).await;

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_discussions");
        server
            .send(json!({ "type": "discussions_snapshot", "data": [discussion_json("d1")] }))
            .await;

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_messages");
        server.send(json!({ "type": "messages_page", "data": [] })).await;

        // The blank send was dropped client-side, so the very next frame
        // must be the real message.
        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "send_message");
        assert_eq!(frame["data"]["discussion_id"], "d1");
        assert_eq!(frame["data"]["recipient_id"], "u2");
        assert_eq!(frame["data"]["text"], "hello");
        // The sidebar refresh riding along with the send.
        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_discussions");
        server
            .send(json!({ "type": "discussions_snapshot", "data": [discussion_json("d1")] }))
            .await;

        // Fan the sent message back, as to any participant.
        server
            .send(json!({ "type": "message_received",
                "data": message_json("m1", "d1", "2025-03-01T12:00:00Z", "hello") }))
            .await;

        server.run_to_eof().await;
    });

    let (mut session, mut events) = connect_session(addr).await;
    drive_until(&mut session, &mut events, |s| !s.directory().is_empty()).await;

    session.select_discussion(&"d1".into()).await.unwrap();
    drive_until(&mut session, &mut events, |s| {
        s.stream().is_empty() && s.stream().state() == StreamState::Ready
    })
    .await;

    session.send_message("   ").await.unwrap();
    session.send_message("hello").await.unwrap();

    drive_until(&mut session, &mut events, |s| s.stream().len() == 1).await;
    assert_eq!(session.stream().messages()[0].text, "hello");

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn duplicate_push_is_logged_once() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut server = FakeServer::accept(&listener).await;

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_discussions");
        server
            .send(json!({ "type": "discussions_snapshot", "data": [discussion_json("d1")] }))
            .await;

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_messages");
        server
            .send(json!({ "type": "messages_page",
                "data": [message_json("m1", "d1", "2025-03-01T12:00:00Z", "one")] }))
            .await;

        let dup = message_json("m2", "d1", "2025-03-01T12:00:05Z", "twice");
        server.send(json!({ "type": "message_received", "data": dup.clone() })).await;
        server.send(json!({ "type": "message_received", "data": dup })).await;
        // Sentinel: once this lands, both duplicates have been processed.
        server
            .send(json!({ "type": "message_received",
                "data": message_json("m3", "d1", "2025-03-01T12:00:10Z", "done") }))
            .await;

        server.run_to_eof().await;
    });

    let (mut session, mut events) = connect_session(addr).await;
    drive_until(&mut session, &mut events, |s| !s.directory().is_empty()).await;
    session.select_discussion(&"d1".into()).await.unwrap();

    drive_until(&mut session, &mut events, |s| {
        s.stream().messages().iter().any(|m| m.id == "m3".into())
    })
    .await;

    let ids: Vec<&str> = session.stream().messages().iter().map(|m| m.id.0.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn stale_page_after_switching_discussions_is_discarded() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut server = FakeServer::accept(&listener).await;

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["type"], "request_discussions");
        server
            .send(json!({ "type": "discussions_snapshot",
                "data": [discussion_json("d1"), discussion_json("d2")] }))
            .await;

        // Two history requests arrive back-to-back: the client switched
        // discussions before the first response went out.
        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["data"]["discussion_id"], "d1");
        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame["data"]["discussion_id"], "d2");

        // Answer the superseded request first, then the live one.
        server
            .send(json!({ "type": "messages_page",
                "data": [message_json("m1", "d1", "2025-03-01T12:00:00Z", "stale")] }))
            .await;
        server
            .send(json!({ "type": "messages_page",
                "data": [message_json("m7", "d2", "2025-03-01T12:00:07Z", "fresh")] }))
            .await;

        server.run_to_eof().await;
    });

    let (mut session, mut events) = connect_session(addr).await;
    drive_until(&mut session, &mut events, |s| s.directory().len() == 2).await;

    session.select_discussion(&"d1".into()).await.unwrap();
    session.select_discussion(&"d2".into()).await.unwrap();

    drive_until(&mut session, &mut events, |s| !s.stream().is_empty()).await;

    assert_eq!(session.stream().discussion_id(), Some(&"d2".into()));
    let ids: Vec<&str> = session.stream().messages().iter().map(|m| m.id.0.as_str()).collect();
    assert_eq!(ids, vec!["m7"]);

    session.disconnect().await;
    server.await.unwrap();
}
