//! Session registry: the single place that maps keys to live sessions.
//!
//! One registry-wide mutex protects the map. The contract is check-then-
//! create: concurrent callers for the same key observe exactly one factory
//! invocation. Nothing network-bound ever runs while the lock is held;
//! backends do their slow work in `start()` after the entry is stored.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;

use super::{Session, SessionKey, SessionResult, SessionStatus};

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Total live sessions.
    pub total: usize,
    /// Live sessions per status.
    pub by_status: HashMap<SessionStatus, usize>,
}

/// Holds all live sessions keyed by (user, app, riff).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for `key`, or build one with `factory`.
    ///
    /// The factory runs under the registry lock and must be construction
    /// only, never network I/O. If an entry already exists the factory is
    /// not invoked and the existing session is returned unchanged.
    pub async fn get_or_create<F>(&self, key: &SessionKey, factory: F) -> SessionResult<Arc<Session>>
    where
        F: FnOnce() -> SessionResult<Arc<Session>>,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(key) {
            return Ok(existing.clone());
        }
        let session = factory()?;
        sessions.insert(key.clone(), session.clone());
        info!("Registered session {key}");
        Ok(session)
    }

    /// Look up a session. Absence is a modeled outcome, not an error.
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Remove a session, invoking backend cleanup exactly once.
    ///
    /// Cleanup runs after the lock is released so a slow teardown never
    /// blocks unrelated sessions. Cleanup errors are logged and swallowed;
    /// removal always succeeds from the registry's point of view.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let removed = { self.sessions.lock().await.remove(key) };
        match removed {
            Some(session) => {
                if let Err(e) = session.backend().cleanup().await {
                    warn!("Cleanup for session {key} failed (ignored): {e}");
                }
                info!("Removed session {key}");
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Totals per status. Backend status calls run outside the lock.
    pub async fn stats(&self) -> RegistryStats {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().await.values().cloned().collect();

        let mut stats = RegistryStats {
            total: sessions.len(),
            by_status: HashMap::new(),
        };
        for session in sessions {
            *stats.by_status.entry(session.status().await).or_insert(0) += 1;
        }
        stats
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
