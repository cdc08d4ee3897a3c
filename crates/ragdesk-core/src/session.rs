//! Per-session conversation history.
//!
//! [`SessionStore`] owns a `DashMap` from session id to an
//! `Arc<Mutex<Session>>`. The map is only held long enough to clone the
//! `Arc`; the per-session mutex is then locked on its own, so appends to one
//! session serialize while different sessions never contend.
//!
//! Sessions are created lazily and removed by [`SessionStore::clear`] or by
//! eviction:
//!
//! - idle longer than `idle_ttl` → removed
//! - more than `max_sessions` live → least recently active removed
//!
//! Eviction runs whenever a new session is created.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::Message;

/// Default history window passed to generation.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// Maximum messages returned by [`SessionStore::window`].
    pub history_window: usize,
    /// `None` disables idle expiry.
    pub idle_ttl: Option<Duration>,
    /// `0` disables the cap.
    pub max_sessions: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            idle_ttl: Some(Duration::hours(24)),
            max_sessions: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    fn tail(&self, max_messages: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(max_messages);
        self.messages[start..].to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

type SessionHandle = Arc<Mutex<Session>>;

fn lock(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    policy: SessionPolicy,
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Return the id of an existing session, or create one. A missing or
    /// blank id gets a fresh UUID.
    pub fn get_or_create(&self, session_id: Option<&str>) -> String {
        let id = match session_id.and_then(normalize_id) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        self.handle(&id);
        id
    }

    fn handle(&self, session_id: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(session_id) {
            return Arc::clone(existing.value());
        }
        self.sweep_at(Utc::now());
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "session created");
                Arc::new(Mutex::new(Session::new(session_id.to_string())))
            })
            .value()
            .clone()
    }

    /// Append one message, creating the session if needed.
    pub fn append(&self, session_id: &str, message: Message) {
        let handle = self.handle(session_id);
        let mut session = lock(&handle);
        session.messages.push(message);
        session.last_active = Utc::now();
    }

    /// Append a user message and its reply under one lock, so readers never
    /// observe the user turn without its answer.
    pub fn append_turn(&self, session_id: &str, user: Message, assistant: Message) {
        let handle = self.handle(session_id);
        let mut session = lock(&handle);
        session.messages.push(user);
        session.messages.push(assistant);
        session.last_active = Utc::now();
    }

    /// The most recent `max_messages` messages, oldest first. Unknown
    /// sessions have an empty history.
    pub fn history(&self, session_id: &str, max_messages: usize) -> Vec<Message> {
        let Some(handle) = self.sessions.get(session_id).map(|h| Arc::clone(h.value())) else {
            return Vec::new();
        };
        let session = lock(&handle);
        session.tail(max_messages)
    }

    /// History bounded by the configured window.
    pub fn window(&self, session_id: &str) -> Vec<Message> {
        self.history(session_id, self.policy.history_window)
    }

    /// Full transcript.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.history(session_id, usize::MAX)
    }

    /// Remove a session. Returns `false` if it did not exist.
    pub fn clear(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            debug!(session_id, "session cleared");
        }
        removed
    }

    /// All sessions, most recently active first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .snapshot()
            .iter()
            .map(|handle| {
                let s = lock(handle);
                SessionSummary {
                    session_id: s.id.clone(),
                    message_count: s.messages.len(),
                    created_at: s.created_at,
                    last_active: s.last_active,
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_active
                .cmp(&a.last_active)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        summaries
    }

    fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Evict idle sessions and enforce the session cap as of `now`, leaving
    /// room for one new session. Returns the number removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut activity: Vec<(String, DateTime<Utc>)> = self
            .snapshot()
            .iter()
            .map(|handle| {
                let s = lock(handle);
                (s.id.clone(), s.last_active)
            })
            .collect();

        let mut removed = 0;
        if let Some(ttl) = self.policy.idle_ttl {
            activity.retain(|(id, last_active)| {
                if now - *last_active > ttl {
                    if self.sessions.remove(id).is_some() {
                        removed += 1;
                    }
                    false
                } else {
                    true
                }
            });
        }

        if self.policy.max_sessions > 0 && activity.len() >= self.policy.max_sessions {
            activity.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = activity.len() + 1 - self.policy.max_sessions;
            for (id, _) in activity.iter().take(excess) {
                if self.sessions.remove(id).is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed, "sessions evicted");
        }
        removed
    }
}

/// Session ids are compared trimmed; a blank id names no session.
pub fn normalize_id(session_id: &str) -> Option<&str> {
    let id = session_id.trim();
    (!id.is_empty()).then_some(id)
}
