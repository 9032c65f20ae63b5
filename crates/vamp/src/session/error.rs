//! Session error types.

use thiserror::Error;

use crate::container::ContainerError;
use crate::engine::EngineError;
use crate::runtime::RuntimeError;
use crate::workspace::WorkspaceError;

use super::SessionKey;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while orchestrating sessions.
///
/// Conflict-style conditions (branch/PR/session already exists) never appear
/// here; they are resolved through adoption by the provisioning path.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing credential, invalid path, or similar. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No session exists for the given key.
    #[error("session not found: {0}")]
    NotFound(SessionKey),

    /// Workspace provisioning failed.
    #[error("workspace provisioning failed: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Remote runtime lifecycle failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Container runtime failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The execution engine reported a failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A readiness wait exhausted its budget. Distinct from hard failure so
    /// callers can decide whether to retry.
    #[error("backend not ready: {0}")]
    NotReady(String),

    /// A transient network failure (timeout, 5xx).
    #[error("transient network failure: {0}")]
    Transient(String),

    /// An internal backend failure, captured into the session's ERROR state.
    #[error("backend error: {0}")]
    Backend(String),
}
