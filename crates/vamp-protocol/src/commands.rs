//! Tracked command records.
//!
//! Commands sent to an agent session (installs, runs, tests, lints) are
//! tracked per category so callers can ask "what happened to the last test
//! run". Every record transitions Sent -> Executing -> Completed at most
//! once; a bounded ring of recent records is retained per category.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters of raw output retained on a completed record.
pub const COMMAND_OUTPUT_CAP: usize = 1000;

/// The category a tracked command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCategory {
    Install,
    Run,
    Test,
    Lint,
}

impl CommandCategory {
    /// All known categories.
    pub const ALL: [CommandCategory; 4] = [Self::Install, Self::Run, Self::Test, Self::Lint];
}

impl std::fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Run => write!(f, "run"),
            Self::Test => write!(f, "test"),
            Self::Lint => write!(f, "lint"),
        }
    }
}

/// Lifecycle status of a tracked command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Sent to the backend, no matching event seen yet.
    Sent,
    /// A tool action correlated to this command is in flight.
    Executing,
    /// A matching observation arrived; exit code and output are final.
    Completed,
}

/// A tracked command and its correlated outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Unique command ID assigned at send time.
    pub command_id: String,
    /// Command category.
    pub category: CommandCategory,
    /// The command text that was sent.
    pub command: String,
    /// When the command was sent.
    pub sent_at: DateTime<Utc>,
    /// Current status.
    pub status: CommandStatus,
    /// Exit code from the correlated observation, once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Truncated output from the correlated observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// The tool-call ID this record was correlated to, once matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommandRecord {
    /// Create a freshly-sent record.
    pub fn sent(category: CommandCategory, command: impl Into<String>) -> Self {
        Self {
            command_id: format!("cmd_{}", uuid::Uuid::new_v4().simple()),
            category,
            command: command.into(),
            sent_at: Utc::now(),
            status: CommandStatus::Sent,
            exit_code: None,
            output: None,
            correlation_id: None,
        }
    }

    /// Correlate this record to a tool call and mark it executing.
    pub fn mark_executing(&mut self, tool_call_id: &str) {
        self.correlation_id = Some(tool_call_id.to_string());
        self.status = CommandStatus::Executing;
    }

    /// Finalize this record with the observed outcome.
    ///
    /// The stored output is capped at [`COMMAND_OUTPUT_CAP`] characters.
    pub fn complete(&mut self, tool_call_id: &str, exit_code: Option<i32>, output: Option<&str>) {
        self.correlation_id = Some(tool_call_id.to_string());
        self.status = CommandStatus::Completed;
        self.exit_code = exit_code;
        self.output = output.map(|o| truncate_output(o, COMMAND_OUTPUT_CAP));
    }

    /// Whether this record is still awaiting correlation.
    pub fn is_pending(&self) -> bool {
        self.status == CommandStatus::Sent
    }
}

/// Truncate `text` to at most `cap` characters, on a char boundary.
pub fn truncate_output(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    text.chars().take(cap).collect()
}
