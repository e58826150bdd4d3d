//! Concurrent session store with sliding TTL expiration.
//!
//! Sessions live in a sharded `DashMap`, so operations on different sessions
//! do not contend and the sweep only ever holds one shard lock at a time.
//! Expiry is checked lazily on every access as well as by the periodic
//! sweep: an expired session is never returned, even before it is swept.
//!
//! Only mutating calls count as activity. `get`, `list` and the revision
//! lookups are passive and do not extend a session's lifetime.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use qalam_core::clock::{Clock, SystemClock};
use qalam_core::error::SessionError;
use qalam_core::event::{DomainEvent, EventBus};
use qalam_core::message::{Role, SessionId};
use qalam_core::session::{Revision, Session, SessionLimits, SessionSummary};
use tracing::{debug, info};

/// Store-wide session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Initial sliding window for new sessions
    pub ttl: Duration,
    pub max_sessions: usize,
    pub limits: SessionLimits,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(30),
            max_sessions: 1000,
            limits: SessionLimits::default(),
        }
    }
}

impl From<&qalam_config::SessionConfig> for SessionSettings {
    fn from(config: &qalam_config::SessionConfig) -> Self {
        Self {
            ttl: Duration::seconds(config.ttl_secs.min(qalam_config::MAX_TTL_SECS) as i64),
            max_sessions: config.max_sessions,
            limits: SessionLimits {
                max_messages: config.max_messages,
                max_revisions: config.max_revisions,
            },
        }
    }
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    /// Serializes purge-evict-insert in `create`
    admission: Mutex<()>,
}

impl SessionStore {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            settings,
            clock: Arc::new(SystemClock),
            events: None,
            admission: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The time source this store stamps sessions and events with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Open a new session. Expired sessions are purged first; if the store
    /// is still full, the least recently active sessions are evicted.
    pub fn create(&self, context: Option<String>) -> Result<SessionId, SessionError> {
        let max = self.settings.max_sessions;
        if max == 0 {
            return Err(SessionError::CapacityExceeded { max_sessions: 0 });
        }

        let _admission = self.admission.lock();
        let now = self.clock.now();

        if self.sessions.len() >= max {
            self.sweep_at(now);
        }
        while self.sessions.len() >= max {
            let Some(victim) = self.least_recently_active() else {
                break;
            };
            if self.sessions.remove(&victim).is_some() {
                info!(session_id = %victim, "Session evicted to make room");
                self.publish(DomainEvent::SessionEvicted {
                    session_id: victim.to_string(),
                    timestamp: now,
                });
            }
        }
        if self.sessions.len() >= max {
            return Err(SessionError::CapacityExceeded { max_sessions: max });
        }

        let session = Session::new(context, now, self.settings.ttl);
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        debug!(session_id = %id, "Session created");
        self.publish(DomainEvent::SessionCreated {
            session_id: id.to_string(),
            timestamp: now,
        });
        Ok(id)
    }

    fn least_recently_active(&self) -> Option<SessionId> {
        self.sessions
            .iter()
            .min_by_key(|entry| entry.value().last_activity_at)
            .map(|entry| entry.key().clone())
    }

    /// Snapshot of a live session. Does not count as activity.
    pub fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        let now = self.clock.now();
        match self.sessions.get(id) {
            None => return Err(not_found(id)),
            Some(entry) if !entry.is_expired(now) => return Ok(entry.value().clone()),
            Some(_) => {}
        }
        self.expire(id, now);
        Err(not_found(id))
    }

    /// Run `f` on a live session under its entry lock.
    fn with_live<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session, DateTime<Utc>) -> T,
    ) -> Result<T, SessionError> {
        let now = self.clock.now();
        {
            let Some(mut entry) = self.sessions.get_mut(id) else {
                return Err(not_found(id));
            };
            if !entry.is_expired(now) {
                return Ok(f(entry.value_mut(), now));
            }
        }
        self.expire(id, now);
        Err(not_found(id))
    }

    /// Append a message, dropping the oldest beyond the cap, and slide the
    /// session's expiration.
    pub fn append_message(
        &self,
        id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<Session, SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::Validation("message content is empty".into()));
        }
        let cap = self.settings.limits.max_messages;
        self.with_live(id, |session, now| {
            session.push_message(role, content.to_string(), now, cap);
            session.clone()
        })
    }

    /// Record a new version of the letter. Returns its version number.
    pub fn append_revision(&self, id: &SessionId, content: &str) -> Result<u64, SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::Validation("revision content is empty".into()));
        }
        let cap = self.settings.limits.max_revisions;
        let version = self.with_live(id, |session, now| {
            session.push_revision(content.to_string(), now, cap)
        })?;
        debug!(session_id = %id, version, "Revision recorded");
        Ok(version)
    }

    /// The letter as of `version`, if it is still retained.
    pub fn get_revision(&self, id: &SessionId, version: u64) -> Result<Revision, SessionError> {
        self.get(id)?
            .revision(version)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("{id} revision {version}")))
    }

    pub fn latest_revision(&self, id: &SessionId) -> Result<Option<Revision>, SessionError> {
        Ok(self.get(id)?.latest_revision().cloned())
    }

    /// Grow a session's window by `extra` and return the new expiration.
    /// This is not activity: `last_activity_at` is left alone.
    pub fn extend(&self, id: &SessionId, extra: Duration) -> Result<DateTime<Utc>, SessionError> {
        if extra <= Duration::zero() {
            return Err(SessionError::Validation(format!(
                "extension must be positive, got {}ms",
                extra.num_milliseconds()
            )));
        }
        let max_ttl = Duration::seconds(qalam_config::MAX_TTL_SECS as i64);
        let expires_at = self
            .with_live(id, |session, _| session.extend(extra, max_ttl))?
            .ok_or_else(|| {
                SessionError::Validation(format!(
                    "extension of {}ms would push the session window past {}s",
                    extra.num_milliseconds(),
                    qalam_config::MAX_TTL_SECS
                ))
            })?;
        debug!(session_id = %id, %expires_at, "Session extended");
        Ok(expires_at)
    }

    /// Remove a session. Returns whether anything was removed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Session deleted");
            self.publish(DomainEvent::SessionDeleted {
                session_id: id.to_string(),
                timestamp: self.clock.now(),
            });
        }
        removed
    }

    /// Summaries, most recently active first.
    pub fn list(&self, include_expired: bool) -> Vec<SessionSummary> {
        let now = self.clock.now();
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary(now))
            .filter(|s| include_expired || !s.expired)
            .collect();
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        out
    }

    /// Remove every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired.iter().filter(|id| self.expire(id, now)).count()
    }

    /// Remove `id` if it is still expired at `now`. Activity between the
    /// scan and the removal keeps the session.
    fn expire(&self, id: &SessionId, now: DateTime<Utc>) -> bool {
        let removed = self
            .sessions
            .remove_if(id, |_, session| session.is_expired(now))
            .is_some();
        if removed {
            debug!(session_id = %id, "Session expired");
            self.publish(DomainEvent::SessionExpired {
                session_id: id.to_string(),
                timestamp: now,
            });
        }
        removed
    }

    /// Stored sessions, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

fn not_found(id: &SessionId) -> SessionError {
    SessionError::NotFound(id.to_string())
}
