//! Session/runtime orchestration for riff conversations.
//!
//! A riff is a named unit of work on a cloned repository, held as a
//! persistent conversation with a coding agent. This crate owns the
//! orchestration core: the session registry (at most one live execution per
//! (user, app, riff) key), the pluggable execution backends (in-process,
//! container, remote), idempotent workspace/branch/pull-request provisioning,
//! and the normalization path that turns heterogeneous backend events into
//! storable messages and correlated command records.
//!
//! HTTP routing, CLI rendering, and the on-disk persistence format live in
//! the embedding service; this crate exposes them as collaborator traits
//! ([`engine::AgentEngine`], [`storage::SessionStore`],
//! [`container::ContainerRuntimeApi`]).

pub mod backend;
pub mod canon;
pub mod commands;
pub mod container;
pub mod engine;
pub mod observability;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod storage;
pub mod workspace;
