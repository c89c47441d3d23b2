//! In-memory chat sessions with idle expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chat::ChatMessage;

/// Idle time after which a session is discarded.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Interval between background purges in the server.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Snapshot of a session for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time the session was read or written.
    pub last_accessed: DateTime<Utc>,
    /// Number of stored messages.
    pub message_count: usize,
    /// Free-form metadata attached to the session.
    pub metadata: Map<String, Value>,
}

struct Session {
    messages: Vec<ChatMessage>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    touched: Instant,
    metadata: Map<String, Value>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            created_at: now,
            last_accessed: now,
            touched: Instant::now(),
            metadata: Map::new(),
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.touched = Instant::now();
    }
}

/// Thread-safe session map. Every access checks expiry before refreshing the
/// idle timer, so an expired session is never revived by a late read.
pub struct SessionStore {
    timeout: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

impl SessionStore {
    /// Creates an empty store whose sessions expire after `timeout` idle.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a new session and returns its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().insert(id.clone(), Session::new());
        info!(session_id = %id, "created session");
        id
    }

    /// Returns `id` when it names a live session, otherwise a fresh one.
    pub fn resolve(&self, id: Option<&str>) -> String {
        match id {
            Some(id) if self.exists(id) => id.to_string(),
            _ => self.create(),
        }
    }

    /// True when `id` is live; refreshes its idle timer.
    pub fn exists(&self, id: &str) -> bool {
        self.with_session(id, |_| ()).is_some()
    }

    /// Appends a message; false when the session is missing or expired.
    pub fn add_message(&self, id: &str, message: ChatMessage) -> bool {
        let role = message.role.clone();
        let added = self
            .with_session(id, |session| session.messages.push(message))
            .is_some();
        if added {
            debug!(session_id = id, role = %role, "added message");
        }
        added
    }

    /// Returns the last `limit` messages (all when `limit` is `None`).
    pub fn messages(&self, id: &str, limit: Option<usize>) -> Vec<ChatMessage> {
        self.with_session(id, |session| {
            let skip = limit
                .map(|limit| session.messages.len().saturating_sub(limit))
                .unwrap_or(0);
            session.messages[skip..].to_vec()
        })
        .unwrap_or_default()
    }

    /// Merges `metadata` into the session's metadata map.
    pub fn update_metadata(&self, id: &str, metadata: Map<String, Value>) -> bool {
        self.with_session(id, |session| session.metadata.extend(metadata))
            .is_some()
    }

    /// Describes a live session.
    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        self.with_session(id, |session| SessionInfo {
            id: id.to_string(),
            created_at: session.created_at,
            last_accessed: session.last_accessed,
            message_count: session.messages.len(),
            metadata: session.metadata.clone(),
        })
    }

    /// Removes a session; false when it did not exist.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            info!(session_id = id, "deleted session");
        }
        removed
    }

    /// Drops every expired session and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.touched.elapsed() <= self.timeout);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "purged expired sessions");
        }
        removed
    }

    /// Number of sessions held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no sessions are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_session<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut sessions = self.sessions.lock();
        let expired = sessions
            .get(id)
            .map(|session| session.touched.elapsed() > self.timeout)?;
        if expired {
            sessions.remove(id);
            debug!(session_id = id, "session expired");
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.touch();
        Some(f(session))
    }
}
