//! Agent execution engine seam.
//!
//! The engine that actually "thinks" (LLM calls, tool dispatch) is owned by
//! an external collaborator. The orchestrator only needs to create a
//! conversation over a workspace, push text into it, drive a run, and
//! receive events through a sink, once per event, in emission order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use vamp_protocol::AgentEvent;

use crate::session::SessionKey;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be constructed for this workspace.
    #[error("engine setup failed: {0}")]
    Setup(String),

    /// A failure inside the engine or one of its tools.
    #[error("engine failure: {0}")]
    Internal(String),
}

/// Receives backend events, once per event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, key: &SessionKey, event: AgentEvent);
}

/// Shared handle to an event sink.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Coarse conversation state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// A single agent conversation bound to a workspace.
#[async_trait]
pub trait AgentConversation: Send + Sync {
    /// Queue user text into the conversation.
    async fn send_message(&mut self, text: &str) -> EngineResult<()>;

    /// Drive the conversation until the agent yields. Events are emitted
    /// through the sink supplied at creation time.
    async fn run(&mut self) -> EngineResult<()>;

    /// Current engine-reported state.
    fn state(&self) -> ConversationState;
}

/// Factory for agent conversations.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Create a conversation over `workspace` with the given system prompt.
    ///
    /// The engine must invoke `sink.deliver` exactly once per event it
    /// produces, in emission order.
    async fn create_conversation(
        &self,
        key: &SessionKey,
        workspace: &Path,
        system_prompt: &str,
        sink: SharedEventSink,
    ) -> EngineResult<Box<dyn AgentConversation>>;
}
