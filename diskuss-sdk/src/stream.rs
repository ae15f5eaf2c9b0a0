//! Per-active-discussion message log: backward pagination plus live
//! append, with de-duplication and ordering guarantees.
//!
//! The protocol carries no request correlation ids, so a history response
//! can arrive for a request the stream no longer cares about (the user
//! switched discussions, or the connection bounced). Every request bumps a
//! generation counter and the response is applied only if the generation
//! still matches — the client-side stand-in for server-side cancellation.
//!
//! The log itself is a strict ascending sort by `(timestamp, id)` with
//! unique ids, regardless of the arrival order of page responses versus
//! pushes. It is never emptied on failure; only an explicit switch to a
//! different discussion clears it.

use std::collections::HashSet;

use crate::types::{DiscussionId, Message, MessageId, UserId};

/// Default history page size, matching the server's.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Loading phase of the active discussion's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No discussion activated yet.
    Empty,
    /// A history request is outstanding (first page or older history).
    Loading,
    /// At least one page has been applied.
    Ready,
}

/// A history request the session should put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub discussion_id: DiscussionId,
    pub limit: usize,
    pub offset: usize,
}

/// A validated outgoing message the session should put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub discussion_id: DiscussionId,
    pub recipient_id: UserId,
    pub text: String,
}

#[derive(Debug, Clone)]
struct Pending {
    generation: u64,
    offset: usize,
}

/// The ordered, de-duplicated, paginated log for the active discussion.
#[derive(Debug)]
pub struct MessageStream {
    discussion_id: Option<DiscussionId>,
    /// Ascending by `(timestamp, id)`, ids unique.
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    state: StreamState,
    page_size: usize,
    /// Bumped by every new request and by disconnection; a response whose
    /// generation no longer matches is stale and dropped.
    generation: u64,
    pending: Option<Pending>,
    /// How much history has been fetched via pages (the next offset).
    fetched: usize,
}

impl Default for MessageStream {
    fn default() -> Self {
        Self {
            discussion_id: None,
            messages: Vec::new(),
            seen: HashSet::new(),
            state: StreamState::Empty,
            page_size: DEFAULT_PAGE_SIZE,
            generation: 0,
            pending: None,
            fetched: 0,
        }
    }
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The active discussion, if any.
    pub fn discussion_id(&self) -> Option<&DiscussionId> {
        self.discussion_id.as_ref()
    }

    /// The log, ascending by `(timestamp, id)`.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Make `discussion_id` the active discussion and request its first
    /// page. Switching away from another discussion discards its log;
    /// re-activating the same one keeps the log and refreshes it.
    ///
    /// Any outstanding request is superseded: its response, should it still
    /// arrive, fails the generation check and is dropped.
    pub fn activate(&mut self, discussion_id: DiscussionId, page_size: usize) -> PageRequest {
        if self.discussion_id.as_ref() != Some(&discussion_id) {
            self.messages.clear();
            self.seen.clear();
            self.fetched = 0;
        }
        self.discussion_id = Some(discussion_id.clone());
        self.page_size = page_size;
        self.state = StreamState::Loading;
        self.generation += 1;
        self.pending = Some(Pending { generation: self.generation, offset: 0 });
        PageRequest { discussion_id, limit: page_size, offset: 0 }
    }

    /// Request the next page of older history. Returns `None` when no
    /// discussion is active or a request is already outstanding.
    pub fn load_older(&mut self) -> Option<PageRequest> {
        let discussion_id = self.discussion_id.clone()?;
        if self.pending.is_some() {
            return None;
        }
        self.state = StreamState::Loading;
        self.generation += 1;
        self.pending = Some(Pending { generation: self.generation, offset: self.fetched });
        Some(PageRequest { discussion_id, limit: self.page_size, offset: self.fetched })
    }

    /// Re-request the first page for the active discussion, if any.
    ///
    /// Issued by the session after the channel reauthenticates: the
    /// previous connection's in-flight request was abandoned with it.
    pub fn refresh(&mut self) -> Option<PageRequest> {
        let discussion_id = self.discussion_id.clone()?;
        Some(self.activate(discussion_id, self.page_size))
    }

    /// Apply a `messages_page` response.
    ///
    /// The page is dropped when nothing is pending, when its generation is
    /// stale, or when its messages belong to a discussion other than the
    /// active one (a response for a superseded request). Returns whether
    /// the page was applied.
    pub fn apply_page(&mut self, messages: Vec<Message>) -> bool {
        let Some(pending) = &self.pending else {
            tracing::debug!("Dropping unsolicited messages_page");
            return false;
        };
        if pending.generation != self.generation {
            tracing::debug!(
                generation = pending.generation,
                current = self.generation,
                "Dropping stale messages_page"
            );
            self.pending = None;
            return false;
        }
        let Some(active) = self.discussion_id.clone() else {
            return false;
        };
        if messages.iter().any(|m| m.discussion_id != active) {
            // A response to a superseded request still in the pipe; the
            // answer to the current request has yet to arrive, so the
            // pending slot stays occupied.
            tracing::debug!(discussion = %active, "Dropping messages_page for another discussion");
            return false;
        }

        let offset = pending.offset;
        self.pending = None;
        self.fetched = offset + messages.len();
        for message in messages {
            self.insert(message);
        }
        self.state = StreamState::Ready;
        true
    }

    /// Apply a `message_received` push.
    ///
    /// Appended (in order, de-duplicated) when it belongs to the active
    /// discussion, in `Loading` as well as `Ready`. Returns whether the
    /// message entered the log; the caller routes it to the discussion
    /// directory either way.
    pub fn apply_push(&mut self, message: &Message) -> bool {
        match &self.discussion_id {
            Some(active) if *active == message.discussion_id => {
                self.insert(message.clone());
                true
            }
            _ => false,
        }
    }

    /// Validate an outgoing message. Returns `None` (no-op) when the text
    /// is empty after trimming or no discussion is active. The log is not
    /// touched: the server's `message_received` push is the sole path by
    /// which the sent message appears, which keeps it exactly-once even if
    /// the push races a concurrent page load.
    pub fn prepare_send(&self, text: &str, recipient_id: &UserId) -> Option<SendRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let discussion_id = self.discussion_id.clone()?;
        Some(SendRequest {
            discussion_id,
            recipient_id: recipient_id.clone(),
            text: text.to_string(),
        })
    }

    /// The connection carrying our outstanding request is gone; abandon it.
    ///
    /// The log is kept — it is only emptied by an explicit switch to a
    /// different discussion. The state stays `Loading` if a request was
    /// outstanding, so the session knows to re-issue it after reconnect.
    pub fn on_disconnect(&mut self) {
        self.generation += 1;
        self.pending = None;
    }

    /// Insert preserving ascending `(timestamp, id)` order, skipping ids
    /// already present.
    fn insert(&mut self, message: Message) {
        if self.seen.contains(&message.id) {
            return;
        }
        let key = (message.timestamp, &message.id);
        let idx = self
            .messages
            .partition_point(|m| (m.timestamp, &m.id) < key);
        self.seen.insert(message.id.clone());
        self.messages.insert(idx, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, discussion: &str, ts: i64) -> Message {
        Message {
            id: id.into(),
            discussion_id: discussion.into(),
            sender_id: "u1".into(),
            recipient_id: "u2".into(),
            text: format!("text-{id}"),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn ids(stream: &MessageStream) -> Vec<&str> {
        stream.messages().iter().map(|m| m.id.0.as_str()).collect()
    }

    #[test]
    fn page_then_earlier_push_sorts_ascending() {
        // activate(D1) returns [m1@100, m2@105]; a push m0@90 follows;
        // expected final order m0, m1, m2.
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);

        assert!(stream.apply_page(vec![msg("m1", "d1", 100), msg("m2", "d1", 105)]));
        assert_eq!(stream.state(), StreamState::Ready);

        assert!(stream.apply_push(&msg("m0", "d1", 90)));
        assert_eq!(ids(&stream), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn any_interleaving_yields_sorted_union() {
        let page_a = vec![msg("m3", "d1", 300), msg("m1", "d1", 100)];
        let page_b = vec![msg("m2", "d1", 200), msg("m4", "d1", 400)];
        let push = msg("m5", "d1", 250);

        // Pages before push.
        let mut s1 = MessageStream::new();
        s1.activate("d1".into(), 5);
        s1.apply_page(page_a.clone());
        s1.load_older().unwrap();
        s1.apply_page(page_b.clone());
        s1.apply_push(&push);

        // Push in between.
        let mut s2 = MessageStream::new();
        s2.activate("d1".into(), 5);
        s2.apply_page(page_b);
        s2.apply_push(&push);
        s2.load_older().unwrap();
        s2.apply_page(page_a);

        let expected = vec!["m1", "m2", "m5", "m3", "m4"];
        assert_eq!(ids(&s1), expected);
        assert_eq!(ids(&s2), expected);
    }

    #[test]
    fn push_while_loading_is_kept() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        assert_eq!(stream.state(), StreamState::Loading);

        assert!(stream.apply_push(&msg("m9", "d1", 900)));
        assert_eq!(stream.state(), StreamState::Loading);

        stream.apply_page(vec![msg("m1", "d1", 100)]);
        assert_eq!(ids(&stream), vec!["m1", "m9"]);
        assert_eq!(stream.state(), StreamState::Ready);
    }

    #[test]
    fn push_for_other_discussion_is_not_logged() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        assert!(!stream.apply_push(&msg("mx", "d2", 100)));
        assert!(stream.is_empty());
    }

    #[test]
    fn duplicate_push_appears_once() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.apply_page(vec![msg("m1", "d1", 100)]);

        let m2 = msg("m2", "d1", 200);
        stream.apply_push(&m2);
        stream.apply_push(&m2);
        assert_eq!(ids(&stream), vec!["m1", "m2"]);

        // A page overlapping the push does not duplicate it either.
        stream.load_older().unwrap();
        stream.apply_page(vec![msg("m2", "d1", 200), msg("m0", "d1", 50)]);
        assert_eq!(ids(&stream), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn stale_page_after_reactivation_is_dropped() {
        // activate(D1) then activate(D2) before any response; a page
        // logically for D1 arrives; D2's stream must stay empty.
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.activate("d2".into(), 5);

        assert!(!stream.apply_page(vec![msg("m1", "d1", 100)]));
        assert!(stream.is_empty());
        assert_eq!(stream.state(), StreamState::Loading);

        // D2's own response, still outstanding, lands normally.
        assert!(stream.apply_page(vec![msg("m7", "d2", 700)]));
        assert_eq!(ids(&stream), vec!["m7"]);
    }

    #[test]
    fn unsolicited_page_is_dropped() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.apply_page(vec![msg("m1", "d1", 100)]);
        assert!(!stream.apply_page(vec![msg("m2", "d1", 200)]));
        assert_eq!(ids(&stream), vec!["m1"]);
    }

    #[test]
    fn reactivating_same_discussion_keeps_log() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.apply_page(vec![msg("m1", "d1", 100)]);

        stream.activate("d1".into(), 5);
        assert_eq!(ids(&stream), vec!["m1"]);

        stream.activate("d2".into(), 5);
        assert!(stream.is_empty());
    }

    #[test]
    fn load_older_extends_backward_without_disturbing_the_tail() {
        let mut stream = MessageStream::new();
        let first = stream.activate("d1".into(), 2);
        assert_eq!(first.offset, 0);
        stream.apply_page(vec![msg("m4", "d1", 400), msg("m3", "d1", 300)]);

        // Live append keeps working during pagination.
        let older = stream.load_older().unwrap();
        assert_eq!(older.offset, 2);
        stream.apply_push(&msg("m5", "d1", 500));

        stream.apply_page(vec![msg("m2", "d1", 200), msg("m1", "d1", 100)]);
        assert_eq!(ids(&stream), vec!["m1", "m2", "m3", "m4", "m5"]);

        let older = stream.load_older().unwrap();
        assert_eq!(older.offset, 4);
    }

    #[test]
    fn load_older_is_refused_while_a_request_is_outstanding() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        assert!(stream.load_older().is_none());

        stream.apply_page(vec![msg("m1", "d1", 100)]);
        assert!(stream.load_older().is_some());
    }

    #[test]
    fn blank_send_is_a_no_op() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.apply_page(vec![msg("m1", "d1", 100)]);

        assert!(stream.prepare_send("   ", &"u2".into()).is_none());
        assert_eq!(ids(&stream), vec!["m1"]);

        let req = stream.prepare_send("  hello  ", &"u2".into()).unwrap();
        assert_eq!(req.text, "hello");
        assert_eq!(req.discussion_id, "d1".into());
        // prepare_send never touches the log.
        assert_eq!(ids(&stream), vec!["m1"]);
    }

    #[test]
    fn send_without_active_discussion_is_a_no_op() {
        let stream = MessageStream::new();
        assert!(stream.prepare_send("hello", &"u2".into()).is_none());
    }

    #[test]
    fn page_arriving_after_disconnect_is_dropped() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.on_disconnect();

        assert!(!stream.apply_page(vec![msg("m1", "d1", 100)]));
        assert!(stream.is_empty());
        // Still loading: the session re-issues the request on reconnect.
        assert_eq!(stream.state(), StreamState::Loading);

        let req = stream.refresh().unwrap();
        assert_eq!(req.offset, 0);
        assert!(stream.apply_page(vec![msg("m1", "d1", 100)]));
        assert_eq!(ids(&stream), vec!["m1"]);
    }

    #[test]
    fn disconnect_keeps_previous_log() {
        let mut stream = MessageStream::new();
        stream.activate("d1".into(), 5);
        stream.apply_page(vec![msg("m1", "d1", 100)]);

        stream.load_older().unwrap();
        stream.on_disconnect();
        assert_eq!(ids(&stream), vec!["m1"]);
    }
}
