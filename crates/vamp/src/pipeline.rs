//! Event pipeline.
//!
//! The single downstream consumer of backend events. Each event is fed to
//! the command tracker, normalized into a message, appended to the
//! session's in-memory buffer and handed to the store. One message per
//! event, except the documented empty-assistant-text drop.

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use vamp_protocol::AgentEvent;

use crate::canon::serialize_event;
use crate::commands::CommandTracker;
use crate::engine::EventSink;
use crate::session::{MessageLog, SessionKey};
use crate::storage::SessionStore;

/// Routes raw backend events into tracking, normalization and persistence.
pub struct EventPipeline {
    messages: MessageLog,
    tracker: Arc<CommandTracker>,
    store: Arc<dyn SessionStore>,
}

impl EventPipeline {
    pub fn new(messages: MessageLog, tracker: Arc<CommandTracker>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            messages,
            tracker,
            store,
        }
    }
}

#[async_trait]
impl EventSink for EventPipeline {
    async fn deliver(&self, key: &SessionKey, event: AgentEvent) {
        self.tracker.update_from_event(key, &event).await;

        let Some(message) = serialize_event(&event, key) else {
            return;
        };
        self.messages.write().await.push(message.clone());
        if let Err(e) = self.store.append_message(key, &message).await {
            warn!("Persisting message for {key} failed: {e}");
        }
    }
}
