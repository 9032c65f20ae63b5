//! Workspace provisioning error types.

use thiserror::Error;

/// Result type for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Errors that can occur while provisioning a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Invalid or missing configuration (bad repo URL, missing credential).
    #[error("workspace configuration error: {0}")]
    Configuration(String),

    /// A git subcommand failed.
    #[error("git {operation} failed: {message}")]
    Git { operation: String, message: String },

    /// The hosting API rejected a request.
    #[error("hosting API error: {0}")]
    Hosting(String),

    /// A retryable network failure that survived its retry budget.
    #[error("transient hosting failure: {0}")]
    Transient(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
