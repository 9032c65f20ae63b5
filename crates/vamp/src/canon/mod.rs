//! Event-to-message normalization.
//!
//! Every raw backend event is dispatched exhaustively to at most one
//! normalized [`Message`]. The single silent-drop point in the whole
//! pipeline is an assistant message with no text; every other kind,
//! including kinds nobody recognizes, produces a message, so no event
//! disappears without a trace.

use serde_json::json;
use vamp_protocol::commands::truncate_output;
use vamp_protocol::{AgentEvent, Message, MessageType};

use crate::session::SessionKey;

/// Maximum characters of raw tool output carried in message metadata.
pub const METADATA_OUTPUT_CAP: usize = 1000;

/// Normalize one raw event into a storable message.
///
/// Returns `None` only for assistant messages with empty text.
pub fn serialize_event(event: &AgentEvent, key: &SessionKey) -> Option<Message> {
    let created_by = key.to_string();
    match event {
        AgentEvent::AssistantMessage { text } => {
            if text.trim().is_empty() {
                return None;
            }
            Some(Message::new(MessageType::Assistant, created_by, text.clone()))
        }

        AgentEvent::ToolAction {
            tool_call_id,
            tool,
            detail,
            input,
        } => {
            let content = match detail {
                Some(detail) => format!("{tool}: {detail}"),
                None => format!("running {tool}"),
            };
            Some(
                Message::new(MessageType::System, created_by, content).with_metadata(json!({
                    "toolCallId": tool_call_id,
                    "tool": tool,
                    "input": input,
                })),
            )
        }

        AgentEvent::ToolObservation {
            tool_call_id,
            tool,
            exit_code,
            output,
            is_error,
        } => {
            let name = tool.as_deref().unwrap_or("tool");
            let content = match exit_code {
                Some(code) => format!("{name} finished (exit {code})"),
                None if *is_error => format!("{name} failed"),
                None => format!("{name} finished"),
            };
            let capped = output
                .as_deref()
                .map(|o| truncate_output(o, METADATA_OUTPUT_CAP));
            Some(
                Message::new(MessageType::System, created_by, content).with_metadata(json!({
                    "toolCallId": tool_call_id,
                    "exitCode": exit_code,
                    "isError": is_error,
                    "output": capped,
                })),
            )
        }

        AgentEvent::Error { message } => {
            Some(Message::new(MessageType::Error, created_by, message.clone()))
        }

        // Unrecognized kinds still leave a trace.
        AgentEvent::Unknown { raw_kind, payload } => Some(
            Message::new(
                MessageType::System,
                created_by,
                format!("unhandled event: {raw_kind}"),
            )
            .with_metadata(json!({
                "kind": raw_kind,
                "payload": payload,
            })),
        ),
    }
}
