//! Execution backends.
//!
//! A backend owns the actual agent execution for one session: in-process
//! engine, local container, or hosted remote runtime. All three share the
//! same lifecycle (NotStarted -> Starting -> Running <-> Paused;
//! Running -> Completed | Error) and the same contract: `send_message`
//! returns immediately and messages execute strictly in submission order
//! per session.

mod container;
mod local;
mod remote;

pub use container::ContainerBackend;
pub use local::LocalBackend;
pub use remote::RemoteBackend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use vamp_protocol::AgentEvent;

use crate::engine::{EventSink, SharedEventSink};
use crate::session::{SessionKey, SessionResult, SessionStatus};

/// Snapshot of a backend's lifecycle state.
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub state: SessionStatus,
    /// Error detail when `state == Error`.
    pub detail: Option<String>,
}

impl BackendStatus {
    pub fn new(state: SessionStatus) -> Self {
        Self {
            state,
            detail: None,
        }
    }
}

/// Acknowledgement that a message was accepted for execution.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}

impl SendReceipt {
    pub fn new() -> Self {
        Self {
            message_id: format!("snd_{}", Uuid::new_v4().simple()),
            accepted_at: Utc::now(),
        }
    }
}

impl Default for SendReceipt {
    fn default() -> Self {
        Self::new()
    }
}

/// One session's execution backend.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Bring the backend to running. Safe to call more than once; a backend
    /// that already left NotStarted returns without side effects.
    async fn start(&self) -> SessionResult<()>;

    /// Accept a message for execution and return immediately. Messages for
    /// one session execute strictly in the order they were accepted.
    async fn send_message(&self, text: &str) -> SessionResult<SendReceipt>;

    /// Current lifecycle state.
    async fn status(&self) -> BackendStatus;

    /// Raw backend events observed so far, in arrival order.
    async fn events(&self) -> Vec<AgentEvent>;

    /// Suspend execution. `false` when unsupported or not currently running.
    async fn pause(&self) -> bool;

    /// Resume from pause. `false` when unsupported or not currently paused.
    async fn resume(&self) -> bool;

    /// Release all resources. Idempotent; errors are for logging only, the
    /// registry swallows them.
    async fn cleanup(&self) -> SessionResult<()>;
}

/// Shared mutable lifecycle state for a backend.
#[derive(Debug)]
pub(crate) struct StatusCell {
    inner: RwLock<BackendStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BackendStatus::new(SessionStatus::NotStarted)),
        }
    }

    pub async fn get(&self) -> BackendStatus {
        self.inner.read().await.clone()
    }

    pub async fn state(&self) -> SessionStatus {
        self.inner.read().await.state
    }

    pub async fn set(&self, state: SessionStatus) {
        let mut inner = self.inner.write().await;
        inner.state = state;
        inner.detail = None;
    }

    /// Transition to Error, retaining the failure message.
    pub async fn fail(&self, detail: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.state = SessionStatus::Error;
        inner.detail = Some(detail.into());
    }
}

/// Sink wrapper that records every raw event before forwarding it.
///
/// Backends deliver through this so `events()` can replay the raw stream
/// while the downstream pipeline still sees each event exactly once.
pub(crate) struct RecordingSink {
    events: RwLock<Vec<AgentEvent>>,
    inner: SharedEventSink,
}

impl RecordingSink {
    pub fn new(inner: SharedEventSink) -> Arc<Self> {
        Arc::new(Self {
            events: RwLock::new(Vec::new()),
            inner,
        })
    }

    pub async fn snapshot(&self) -> Vec<AgentEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, key: &SessionKey, event: AgentEvent) {
        self.events.write().await.push(event.clone());
        self.inner.deliver(key, event).await;
    }
}
