//! Session identity, registry, and orchestration service.

mod error;
mod models;
mod registry;
mod service;

pub use error::{SessionError, SessionResult};
pub use models::{
    Adoption, BackendVariant, MessageLog, PullRequestRecord, Session, SessionKey, SessionStatus,
    WorkspaceDescriptor,
};
pub use registry::{RegistryStats, SessionRegistry};
pub use service::{OpenSessionRequest, SessionService, SessionStatusReport};
