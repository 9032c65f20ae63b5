//! Canonical agent events.
//!
//! Backends translate whatever their execution engine emits into this closed
//! union. Dispatch over event kinds is exhaustive; wire payloads with a kind
//! nobody recognizes still parse into [`AgentEvent::Unknown`] so that no
//! event is lost between the backend and the serializer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw event emitted by an execution backend.
///
/// Tagged by `kind` on the wire. Every event a backend observes produces
/// exactly one `AgentEvent`; unrecognized kinds are captured as
/// [`AgentEvent::Unknown`] rather than dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant-authored message content.
    AssistantMessage {
        /// The message text. May be empty for content-free turns.
        #[serde(default)]
        text: String,
    },

    /// A tool invocation started by the agent.
    ToolAction {
        /// Correlation ID shared with the matching observation.
        tool_call_id: String,
        /// Tool name (e.g. "bash", "edit").
        tool: String,
        /// Human-oriented description of what the tool is doing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// Tool input parameters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },

    /// The observed result of a tool invocation.
    ToolObservation {
        /// Correlation ID shared with the originating action.
        tool_call_id: String,
        /// Tool name, when the engine reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        /// Process exit code, for command-style tools.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Raw tool output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        /// Whether the tool execution failed.
        #[serde(default)]
        is_error: bool,
    },

    /// An engine or tool failure.
    Error {
        /// Failure description.
        message: String,
    },

    /// An event whose kind is not part of the canonical vocabulary.
    ///
    /// Produced by [`AgentEvent::from_value`] when a wire payload does not
    /// match any known kind. Carries the raw kind name and payload so the
    /// serializer can still emit a traceable fallback message. The field is
    /// `raw_kind` because `kind` is taken by the enum tag itself.
    Unknown {
        /// The raw kind string from the wire (or "unknown").
        raw_kind: String,
        /// The raw payload, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl AgentEvent {
    /// Parse a wire event, falling back to [`AgentEvent::Unknown`] for
    /// unrecognized kinds or malformed payloads.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<AgentEvent>(value.clone()) {
            Ok(event) => event,
            Err(_) => {
                let raw_kind = value
                    .get("kind")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                AgentEvent::Unknown {
                    raw_kind,
                    payload: Some(value),
                }
            }
        }
    }

    /// The canonical kind name of this event.
    pub fn kind_name(&self) -> &str {
        match self {
            Self::AssistantMessage { .. } => "assistant_message",
            Self::ToolAction { .. } => "tool_action",
            Self::ToolObservation { .. } => "tool_observation",
            Self::Error { .. } => "error",
            Self::Unknown { raw_kind, .. } => raw_kind,
        }
    }

    /// The correlation ID, for events that carry one.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolAction { tool_call_id, .. } | Self::ToolObservation { tool_call_id, .. } => {
                Some(tool_call_id)
            }
            _ => None,
        }
    }
}
