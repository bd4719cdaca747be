use crate::types::Identity;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// How long a sign-in stays valid unless configured otherwise.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct SessionEntry {
    identity: Identity,
    created_at: Instant,
}

/// Server-side session slots keyed by the id carried in the session cookie.
///
/// Entries older than the store's TTL read as absent and are swept out on
/// the next sign-in.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create_session(&self, session_id: &str, identity: Identity) {
        // A panic while holding the lock cannot leave a map entry half written
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let before = sessions.len();
        sessions.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        if sessions.len() < before {
            debug!("Expired {} sessions", before - sessions.len());
        }

        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                identity,
                created_at: Instant::now(),
            },
        );
        debug!("Created session, {} active", sessions.len());
    }

    pub fn get_session(&self, session_id: &str) -> Option<Identity> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.identity.clone())
    }

    pub fn delete_session(&self, session_id: &str) -> Option<Identity> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if removed.is_some() {
            debug!("Deleted session");
        }
        removed.map(|entry| entry.identity)
    }

    pub fn generate_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[cfg(test)]
    fn stored(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
