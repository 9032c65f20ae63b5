//! Command tracking with event correlation.
//!
//! Sends are recorded eagerly; outcomes arrive later as tool events. A
//! record is matched by tool-call ID when one was already correlated, and
//! otherwise by "most recent record still in the sent state", because the
//! first event for a command is the point where the correlation ID becomes
//! known at all.

use std::collections::{HashMap, VecDeque};

use log::debug;
use tokio::sync::RwLock;
use vamp_protocol::{AgentEvent, CommandCategory, CommandRecord};

use crate::session::SessionKey;

/// Records retained per (session, category); oldest evicted first.
pub const MAX_RECORDS_PER_CATEGORY: usize = 10;

/// Tracks commands per session and category.
#[derive(Default)]
pub struct CommandTracker {
    records: RwLock<HashMap<(SessionKey, CommandCategory), VecDeque<CommandRecord>>>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly-sent command. Returns its command ID.
    pub async fn track_sent(
        &self,
        key: &SessionKey,
        category: CommandCategory,
        command_text: &str,
    ) -> String {
        let record = CommandRecord::sent(category, command_text);
        let command_id = record.command_id.clone();

        let mut records = self.records.write().await;
        let ring = records.entry((key.clone(), category)).or_default();
        if ring.len() >= MAX_RECORDS_PER_CATEGORY {
            ring.pop_front();
        }
        ring.push_back(record);
        debug!("Tracked {category} command {command_id} for {key}");
        command_id
    }

    /// Feed a backend event into the tracker.
    ///
    /// Tool actions transition a record to executing; tool observations
    /// complete it, filling exit code and truncated output. Returns whether
    /// any record was updated. Non-tool events are ignored.
    pub async fn update_from_event(&self, key: &SessionKey, event: &AgentEvent) -> bool {
        match event {
            AgentEvent::ToolAction { tool_call_id, .. } => {
                self.transition(key, tool_call_id, |record, id| record.mark_executing(id))
                    .await
            }
            AgentEvent::ToolObservation {
                tool_call_id,
                exit_code,
                output,
                ..
            } => {
                let exit_code = *exit_code;
                let output = output.clone();
                self.transition(key, tool_call_id, move |record, id| {
                    record.complete(id, exit_code, output.as_deref());
                })
                .await
            }
            _ => false,
        }
    }

    /// The most recent record for a category, if any.
    pub async fn status(
        &self,
        key: &SessionKey,
        category: CommandCategory,
    ) -> Option<CommandRecord> {
        self.records
            .read()
            .await
            .get(&(key.clone(), category))
            .and_then(|ring| ring.back().cloned())
    }

    /// Apply `apply` to the record matching `tool_call_id`, or to the most
    /// recently sent still-pending record for this session.
    async fn transition<F>(&self, key: &SessionKey, tool_call_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut CommandRecord, &str),
    {
        let mut records = self.records.write().await;

        // First pass: an already-correlated record.
        for category in CommandCategory::ALL {
            if let Some(ring) = records.get_mut(&(key.clone(), category))
                && let Some(record) = ring
                    .iter_mut()
                    .find(|r| r.correlation_id.as_deref() == Some(tool_call_id))
            {
                apply(record, tool_call_id);
                return true;
            }
        }

        // Fallback: the most recently sent record still pending, across
        // categories for this session.
        let mut best: Option<(CommandCategory, usize, chrono::DateTime<chrono::Utc>)> = None;
        for category in CommandCategory::ALL {
            if let Some(ring) = records.get(&(key.clone(), category)) {
                for (index, record) in ring.iter().enumerate() {
                    if record.is_pending()
                        && best.is_none_or(|(_, _, sent_at)| record.sent_at > sent_at)
                    {
                        best = Some((category, index, record.sent_at));
                    }
                }
            }
        }
        if let Some((category, index, _)) = best
            && let Some(record) = records
                .get_mut(&(key.clone(), category))
                .and_then(|ring| ring.get_mut(index))
        {
            apply(record, tool_call_id);
            return true;
        }
        false
    }
}
