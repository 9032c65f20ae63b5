//! Shared protocol types for the vamp session orchestrator.
//!
//! Every execution backend (in-process, container, remote) speaks the same
//! canonical vocabulary defined here:
//!
//! - [`events`]: the closed union of raw agent events a backend can emit
//! - [`messages`]: the normalized, storable message record
//! - [`commands`]: tracked command records with correlation metadata
//! - [`runner`]: wire types for the remote runtime provisioning API
//!
//! The types are plain serde structs/enums with no I/O so they can be shared
//! between the orchestrator, runners, and test fixtures.

pub mod commands;
pub mod events;
pub mod messages;
pub mod runner;

pub use commands::{CommandCategory, CommandRecord, CommandStatus};
pub use events::AgentEvent;
pub use messages::{Message, MessageType};
pub use runner::{
    HealthResponse, RuntimeInfo, RuntimeState, StartRuntimeRequest, StartRuntimeResponse,
};
