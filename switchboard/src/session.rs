//! In-memory session registry with expiry.
//!
//! Sessions correlate a sequence of stateful-HTTP (or SSE) calls via an opaque,
//! unguessable ID. The manager owns the only copy of each session; transports hold
//! nothing but the ID string. The registry is bounded: when full, creating a new session
//! evicts the least-recently-accessed one rather than growing without limit.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::errors::SessionError;
use switchboard_mcp_protocol::messages::ClientInfo;

/// Arbitrary per-session state, shared with handlers across calls.
pub type SessionState = Arc<RwLock<HashMap<String, Value>>>;

/// A point-in-time view of one session. The state bag is shared with the registry; the
/// timestamps are a snapshot.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub client_info: Option<ClientInfo>,
    pub state: SessionState,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.created_at == other.created_at
            && self.last_accessed_at == other.last_accessed_at
            && self.client_info == other.client_info
            && *self.state.read().expect("session state lock poisoned")
                == *other.state.read().expect("session state lock poisoned")
    }
}

#[derive(Debug)]
struct SessionEntry {
    created_at: Instant,
    last_accessed_at: Instant,
    client_info: Option<ClientInfo>,
    state: SessionState,
}

impl SessionEntry {
    fn snapshot(&self, id: &str) -> Session {
        Session {
            id: id.to_string(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            client_info: self.client_info.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Owns the session map. Constructed once at startup and passed by reference into the
/// transports; not a module-level singleton.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    timeout: Duration,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            max_sessions,
        }
    }

    /// Create a new session. The ID comes from a cryptographically secure random source;
    /// a counter would make session IDs guessable, which is a hijack vector.
    pub fn create(&self, client_info: Option<ClientInfo>) -> Session {
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let entry = SessionEntry {
            created_at: now,
            last_accessed_at: now,
            client_info,
            state: Arc::new(RwLock::new(HashMap::new())),
        };

        let mut sessions = self.sessions.write().expect("session lock poisoned");
        if sessions.len() >= self.max_sessions {
            // Evict the least-recently-accessed session to stay bounded.
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at)
                .map(|(id, _)| id.clone())
            {
                sessions.remove(&oldest);
                tracing::warn!(session_id = %oldest, "Session registry full; evicted least-recently-accessed session");
            }
        }
        let session = entry.snapshot(&id);
        sessions.insert(id, entry);
        session
    }

    /// Look up a session without refreshing its access time. An entry past the idle
    /// timeout is removed and reported as expired.
    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        {
            let sessions = self.sessions.read().expect("session lock poisoned");
            match sessions.get(id) {
                Some(entry) if !self.is_expired(entry) => return Ok(entry.snapshot(id)),
                Some(_) => {}
                None => return Err(SessionError::NotFound(id.to_string())),
            }
        }

        // Expired: drop the read lock, then remove under the write lock.
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        sessions.remove(id);
        tracing::info!(session_id = %id, "Session expired");
        Err(SessionError::Expired(id.to_string()))
    }

    /// Refresh the access time of a session.
    pub fn touch(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        match sessions.get_mut(id) {
            Some(entry) if !self.is_expired(entry) => {
                entry.last_accessed_at = Instant::now();
                Ok(())
            }
            Some(_) => {
                sessions.remove(id);
                tracing::info!(session_id = %id, "Session expired");
                Err(SessionError::Expired(id.to_string()))
            }
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    /// Destroy a session explicitly (client disconnect signal). Returns whether it
    /// existed.
    pub fn destroy(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        let existed = sessions.remove(id).is_some();
        if existed {
            tracing::info!(session_id = %id, "Session destroyed");
        }
        existed
    }

    /// Remove every session past the idle timeout. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
            tracing::info!(session_id = %id, "Session expired; removed by sweep");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &SessionEntry) -> bool {
        entry.last_accessed_at.elapsed() > self.timeout
    }

    /// Run the background sweep on a fixed interval, independent of request traffic.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = manager.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Session sweep complete");
                }
            }
        })
    }
}
