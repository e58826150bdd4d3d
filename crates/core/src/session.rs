//! Editing session domain types.
//!
//! A session is a short-lived conversational context for editing one letter.
//! It carries a bounded rolling message history and a bounded list of letter
//! revisions. Expiration is sliding: every mutating touch resets
//! `expires_at` to `last_activity_at + ttl`.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Role, SessionId};

/// A snapshot of the letter at some point in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Monotonically increasing per session, starting at 1
    pub version: u64,

    /// Full letter text at this version
    pub content: String,

    pub created_at: DateTime<Utc>,
}

/// Bounds applied to every session in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_messages: usize,
    pub max_revisions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_revisions: 10,
        }
    }
}

/// An editing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    pub created_at: DateTime<Utc>,

    /// Updated on every mutating call
    pub last_activity_at: DateTime<Utc>,

    /// Always `last_activity_at + ttl`
    pub expires_at: DateTime<Utc>,

    /// Sliding window length in milliseconds
    pub ttl_ms: i64,

    /// Conversation order, oldest first
    pub messages: VecDeque<Message>,

    /// Oldest first
    pub revisions: VecDeque<Revision>,

    /// Caller-supplied context, fixed at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    next_version: u64,
}

impl Session {
    pub fn new(context: Option<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: SessionId::new(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
            ttl_ms: ttl.num_milliseconds(),
            messages: VecDeque::new(),
            revisions: VecDeque::new(),
            context,
            next_version: 1,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::milliseconds(self.ttl_ms)
    }

    /// A session is expired once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Record activity and slide the expiration window.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
        self.expires_at = now + self.ttl();
    }

    /// Append a message, dropping the oldest ones beyond `cap`.
    pub fn push_message(&mut self, role: Role, content: String, now: DateTime<Utc>, cap: usize) {
        self.messages.push_back(Message::new(role, content, now));
        while self.messages.len() > cap {
            self.messages.pop_front();
        }
        self.touch(now);
    }

    /// Append a revision, dropping the oldest ones beyond `cap`.
    /// Returns the new version number.
    pub fn push_revision(&mut self, content: String, now: DateTime<Utc>, cap: usize) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        self.revisions.push_back(Revision {
            version,
            content,
            created_at: now,
        });
        while self.revisions.len() > cap {
            self.revisions.pop_front();
        }
        self.touch(now);
        version
    }

    /// Grow this session's window by `extra`, keeping
    /// `expires_at == last_activity_at + ttl`.
    ///
    /// Returns `None` and leaves the session unchanged when the new window
    /// would exceed `max_ttl` or the expiration is not representable.
    pub fn extend(&mut self, extra: Duration, max_ttl: Duration) -> Option<DateTime<Utc>> {
        let ttl_ms = self.ttl_ms.checked_add(extra.num_milliseconds())?;
        if ttl_ms > max_ttl.num_milliseconds() {
            return None;
        }
        let expires_at = self
            .last_activity_at
            .checked_add_signed(Duration::milliseconds(ttl_ms))?;
        self.ttl_ms = ttl_ms;
        self.expires_at = expires_at;
        Some(expires_at)
    }

    /// The letter as of `version`, if still retained.
    pub fn revision(&self, version: u64) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.version == version)
    }

    pub fn latest_revision(&self) -> Option<&Revision> {
        self.revisions.back()
    }

    /// The last `n` messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> impl Iterator<Item = &Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            expires_at: self.expires_at,
            message_count: self.messages.len(),
            revision_count: self.revisions.len(),
            latest_version: self.latest_revision().map(|r| r.version),
            expired: self.is_expired(now),
        }
    }
}

/// Lightweight listing view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub message_count: usize,
    pub revision_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<u64>,
    pub expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, DateTime<Utc>) {
        let now = Utc::now();
        (Session::new(None, now, Duration::seconds(60)), now)
    }

    #[test]
    fn new_session_expires_after_ttl() {
        let (s, now) = session();
        assert_eq!(s.expires_at, now + Duration::seconds(60));
        assert!(!s.is_expired(now + Duration::seconds(60)));
        assert!(s.is_expired(now + Duration::seconds(61)));
    }

    #[test]
    fn message_cap_keeps_newest_in_order() {
        let (mut s, now) = session();
        for i in 0..8 {
            s.push_message(Role::User, format!("m{i}"), now, 5);
        }
        let contents: Vec<_> = s.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5", "m6", "m7"]);
    }

    #[test]
    fn revision_versions_survive_eviction() {
        let (mut s, now) = session();
        for i in 0..4 {
            s.push_revision(format!("draft {i}"), now, 2);
        }
        assert_eq!(s.revisions.len(), 2);
        assert!(s.revision(1).is_none());
        assert_eq!(s.revision(4).unwrap().content, "draft 3");
        assert_eq!(s.latest_revision().unwrap().version, 4);
    }

    #[test]
    fn touch_slides_window() {
        let (mut s, now) = session();
        let later = now + Duration::seconds(30);
        s.touch(later);
        assert_eq!(s.last_activity_at, later);
        assert_eq!(s.expires_at, later + s.ttl());
    }

    #[test]
    fn extend_grows_ttl_and_keeps_invariant() {
        let (mut s, now) = session();
        let new_expiry = s.extend(Duration::seconds(120), Duration::days(1));
        assert_eq!(new_expiry, Some(now + Duration::seconds(180)));
        assert_eq!(s.expires_at, s.last_activity_at + s.ttl());

        // The extension survives the next touch
        s.touch(now + Duration::seconds(10));
        assert_eq!(s.expires_at, now + Duration::seconds(190));
    }

    #[test]
    fn extend_past_the_cap_leaves_session_unchanged() {
        let (mut s, now) = session();
        assert_eq!(s.extend(Duration::days(2), Duration::days(1)), None);
        assert_eq!(s.extend(Duration::MAX, Duration::MAX), None);
        assert_eq!(s.extend(Duration::days(200_000_000), Duration::MAX), None);
        assert_eq!(s.ttl(), Duration::seconds(60));
        assert_eq!(s.expires_at, now + Duration::seconds(60));
    }

    #[test]
    fn recent_messages_takes_tail() {
        let (mut s, now) = session();
        for i in 0..5 {
            s.push_message(Role::User, format!("m{i}"), now, 20);
        }
        let tail: Vec<_> = s.recent_messages(2).map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
    }
}
