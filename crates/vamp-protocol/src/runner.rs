//! Wire types for the remote runtime provisioning API.
//!
//! The provisioning service hosts isolated execution environments and exposes
//! a small authenticated HTTP surface:
//!
//! - `POST /start`: provision a runtime for a session
//! - `GET /sessions/{id}`: current runtime state and URL
//! - `POST /pause`, `POST /resume`: suspend/wake a runtime
//! - `GET /health`: the provisioning API's own availability
//!
//! Authentication is a static API key sent in the [`API_KEY_HEADER`] header.

use serde::{Deserialize, Serialize};

/// Header carrying the static provisioning API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Infrastructure-reported runtime state.
///
/// Distinct from liveness: a runtime can report `Running` before its own
/// health endpoint answers, so readiness checks must combine both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Queued,
    Provisioning,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl RuntimeState {
    /// Whether this state can never transition to `Running` again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Body of `POST /start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRuntimeRequest {
    /// The session this runtime is provisioned for.
    pub session_id: String,
}

/// Response to `POST /start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRuntimeResponse {
    /// Runtime identifier for pause/resume calls.
    pub runtime_id: String,
    /// Session credential for calls against the runtime itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Response to `GET /sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Runtime identifier.
    pub runtime_id: String,
    /// Infrastructure-reported state.
    pub state: RuntimeState,
    /// Base URL of the hosted runtime, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Body of `POST /pause` and `POST /resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeControlRequest {
    /// Target runtime.
    pub runtime_id: String,
}

/// Response to `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" when the provisioning API is available.
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
