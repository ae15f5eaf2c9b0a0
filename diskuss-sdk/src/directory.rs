//! Cached set of the session's discussions, for sidebar display and
//! selection.
//!
//! The directory is the exclusive owner of the `Discussion` entities for a
//! session. It is plain state on the session's cooperative timeline —
//! mutated only between awaits, never shared across threads.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::types::{Discussion, DiscussionId, Message};

/// The ordered set of discussions the user participates in.
#[derive(Debug, Default)]
pub struct DiscussionDirectory {
    /// Snapshot order is insertion order; presentation order is computed.
    discussions: Vec<Discussion>,
    active: Option<DiscussionId>,
}

impl DiscussionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire cached set with a fresh snapshot.
    ///
    /// The active selection survives if its discussion is still present,
    /// otherwise it is cleared.
    pub fn replace(&mut self, snapshot: Vec<Discussion>) {
        self.discussions = snapshot;
        if let Some(active) = &self.active
            && !self.discussions.iter().any(|d| &d.id == active)
        {
            self.active = None;
        }
    }

    /// Insert a discussion, or replace the cached copy with the same id.
    ///
    /// Used for `discussion_started` responses; the new entry lands at the
    /// end of insertion order.
    pub fn upsert(&mut self, discussion: Discussion) {
        match self.discussions.iter_mut().find(|d| d.id == discussion.id) {
            Some(slot) => *slot = discussion,
            None => self.discussions.push(discussion),
        }
    }

    /// Mark a discussion active, deactivating any previously active one.
    pub fn select(&mut self, id: &DiscussionId) -> Result<&Discussion> {
        let found = self
            .discussions
            .iter()
            .position(|d| &d.id == id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        self.active = Some(id.clone());
        Ok(&self.discussions[found])
    }

    /// The currently active discussion, if any.
    pub fn active(&self) -> Option<&Discussion> {
        let id = self.active.as_ref()?;
        self.discussions.iter().find(|d| &d.id == id)
    }

    pub fn get(&self, id: &DiscussionId) -> Option<&Discussion> {
        self.discussions.iter().find(|d| &d.id == id)
    }

    pub fn len(&self) -> usize {
        self.discussions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discussions.is_empty()
    }

    /// Fold a pushed or sent message into its discussion's `last_message`.
    ///
    /// Monotonic: the cached entry only moves forward in `(timestamp, id)`
    /// order, so applying pushes in any arrival order converges on the same
    /// result. Messages for unknown discussions are ignored — a later
    /// snapshot refresh is expected to surface the discussion.
    pub fn upsert_from_message(&mut self, message: &Message) {
        let Some(discussion) = self
            .discussions
            .iter_mut()
            .find(|d| d.id == message.discussion_id)
        else {
            tracing::debug!(
                discussion = %message.discussion_id,
                "Message for unknown discussion, awaiting snapshot refresh"
            );
            return;
        };

        let newer = match &discussion.last_message {
            Some(current) => message.sort_key() >= current.sort_key(),
            None => true,
        };
        if newer {
            discussion.last_message = Some(message.clone());
        }
    }

    /// Presentation order: most recently active discussion first
    /// (`last_message` timestamp descending, discussion id as tie-break);
    /// discussions with no message yet follow in insertion order.
    pub fn ordered(&self) -> Vec<&Discussion> {
        let mut out: Vec<&Discussion> = self.discussions.iter().collect();
        // sort_by is stable, which is what keeps insertion order for the
        // message-less tail.
        out.sort_by(|a, b| match (&a.last_message, &b.last_message) {
            (Some(x), Some(y)) => y
                .timestamp
                .cmp(&x.timestamp)
                .then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        out
    }
}
