//! Normalized message records.
//!
//! One message per backend event (modulo the empty-assistant-text rule,
//! which lives in the serializer). Messages are append-only once created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The normalized message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Assistant-authored content.
    Assistant,
    /// Tool activity, lifecycle notices, and fallbacks.
    System,
    /// Engine or tool failures.
    Error,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A normalized, storable conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// The session that produced this message (`user/app/riff`).
    pub created_by: String,
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Flattened text content.
    pub content: String,
    /// Structured payload (tool IDs, truncated raw output, raw event kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// Create a message of the given type.
    pub fn new(
        message_type: MessageType,
        created_by: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            created_at: Utc::now(),
            created_by: created_by.into(),
            message_type,
            content: content.into(),
            metadata: None,
        }
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
