//! Persistence seam.
//!
//! The embedding service owns the on-disk format; the orchestrator only
//! needs load/save for session records and append for messages. The
//! in-memory implementation backs tests and single-process embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use vamp_protocol::Message;

use crate::session::{
    BackendVariant, PullRequestRecord, SessionKey, SessionStatus, WorkspaceDescriptor,
};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The durable portion of a session, sufficient to rebuild its backend
/// without re-provisioning the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub key: SessionKey,
    pub variant: BackendVariant,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Session persistence operations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a persisted session, if one exists for `key`.
    async fn load_session(&self, key: &SessionKey) -> StorageResult<Option<PersistedSession>>;

    /// Create or replace the persisted record for a session.
    async fn save_session(&self, record: &PersistedSession) -> StorageResult<()>;

    /// Append one normalized message to a session's history.
    async fn append_message(&self, key: &SessionKey, message: &Message) -> StorageResult<()>;
}

/// In-memory store used by tests and single-process embedding.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionKey, PersistedSession>>,
    messages: RwLock<HashMap<SessionKey, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All messages appended for `key`, in append order.
    pub async fn messages(&self, key: &SessionKey) -> Vec<Message> {
        self.messages
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, key: &SessionKey) -> StorageResult<Option<PersistedSession>> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn save_session(&self, record: &PersistedSession) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn append_message(&self, key: &SessionKey, message: &Message) -> StorageResult<()> {
        self.messages
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }
}
