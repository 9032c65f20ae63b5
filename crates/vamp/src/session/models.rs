//! Session domain models.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use vamp_protocol::Message;

use crate::backend::ExecutionBackend;

/// Identity of a riff conversation: one live execution per key, globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Owning user.
    pub user_id: String,
    /// Application the riff belongs to.
    pub app_slug: String,
    /// The riff itself; conceptually mapped to a branch.
    pub riff_slug: String,
}

impl SessionKey {
    pub fn new(
        user_id: impl Into<String>,
        app_slug: impl Into<String>,
        riff_slug: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            app_slug: app_slug.into(),
            riff_slug: riff_slug.into(),
        }
    }

    /// The branch name this riff maps to.
    pub fn branch_name(&self) -> &str {
        &self.riff_slug
    }

    /// A single-path-segment identifier for this key.
    ///
    /// The `Display` form contains slashes and cannot be interpolated into
    /// URL path segments; this form can.
    pub fn slug(&self) -> String {
        format!("{}-{}-{}", self.user_id, self.app_slug, self.riff_slug)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.app_slug, self.riff_slug)
    }
}

/// Session lifecycle status.
///
/// NotStarted -> Starting -> Running <-> Paused; Running -> Completed | Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Starting,
    Running,
    Paused,
    Completed,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Which execution backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
    /// Co-located worker in this process.
    Local,
    /// Isolated container on this host.
    Container,
    /// Externally hosted remote runtime.
    Remote,
}

/// How an external resource was satisfied: freshly created or adopted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adoption {
    Created,
    Adopted,
}

/// A provisioned workspace. Read-only after provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceDescriptor {
    /// Repository clone URL.
    pub repo_url: String,
    /// Local checkout path.
    pub path: std::path::PathBuf,
    /// Checked-out branch.
    pub branch: String,
    /// Whether the branch was created or adopted.
    pub adoption: Adoption,
}

/// A pull request associated with a riff branch.
///
/// May be externally closed by a separate teardown flow; the session does not
/// own it exclusively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub number: u64,
    pub url: String,
    pub open: bool,
    pub adoption: Adoption,
}

/// Shared, ordered buffer of normalized messages for one session.
pub type MessageLog = Arc<RwLock<Vec<Message>>>;

/// A live session: key, backend handle, and normalized message buffer.
///
/// Mutable state lives behind the backend (status) and the message log; the
/// registry lock is never needed to touch either.
pub struct Session {
    key: SessionKey,
    variant: BackendVariant,
    backend: Arc<dyn ExecutionBackend>,
    created_at: DateTime<Utc>,
    workspace: Option<WorkspaceDescriptor>,
    pull_request: Option<PullRequestRecord>,
    messages: MessageLog,
}

impl Session {
    pub fn new(
        key: SessionKey,
        variant: BackendVariant,
        backend: Arc<dyn ExecutionBackend>,
        workspace: Option<WorkspaceDescriptor>,
        pull_request: Option<PullRequestRecord>,
        messages: MessageLog,
    ) -> Self {
        Self {
            key,
            variant,
            backend,
            created_at: Utc::now(),
            workspace,
            pull_request,
            messages,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn variant(&self) -> BackendVariant {
        self.variant
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn workspace(&self) -> Option<&WorkspaceDescriptor> {
        self.workspace.as_ref()
    }

    pub fn pull_request(&self) -> Option<&PullRequestRecord> {
        self.pull_request.as_ref()
    }

    /// Current status, as reported by the backend.
    pub async fn status(&self) -> SessionStatus {
        self.backend.status().await.state
    }

    /// Last error detail, if the session is in the error state.
    pub async fn last_error(&self) -> Option<String> {
        let status = self.backend.status().await;
        if status.state == SessionStatus::Error {
            status.detail
        } else {
            None
        }
    }

    /// Snapshot of the normalized message buffer, in arrival order.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("variant", &self.variant)
            .field("created_at", &self.created_at)
            .finish()
    }
}
