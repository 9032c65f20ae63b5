//! Session orchestration service.
//!
//! The high-level entry point: opens sessions (provision workspace, build
//! backend, register, start in the background), routes messages and
//! commands, and answers status queries. Everything network-bound happens
//! outside the registry lock; the factory handed to the registry is pure
//! construction.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{Mutex, RwLock};
use vamp_protocol::{AgentEvent, CommandCategory, CommandRecord, Message};

use crate::backend::{ContainerBackend, ExecutionBackend, LocalBackend, RemoteBackend, SendReceipt};
use crate::commands::CommandTracker;
use crate::container::ContainerRuntimeApi;
use crate::engine::{AgentEngine, SharedEventSink};
use crate::pipeline::EventPipeline;
use crate::runtime::RuntimeLifecycleClient;
use crate::settings::Settings;
use crate::storage::{PersistedSession, SessionStore};
use crate::workspace::WorkspaceProvisioner;

use super::{
    BackendVariant, MessageLog, PullRequestRecord, RegistryStats, Session, SessionError,
    SessionKey, SessionRegistry, SessionResult, SessionStatus, WorkspaceDescriptor,
};

/// Request to open (or re-join) a session.
#[derive(Debug, Clone)]
pub struct OpenSessionRequest {
    pub key: SessionKey,
    pub variant: BackendVariant,
    /// Repository the riff works on.
    pub repo_url: String,
    /// Write credential for push and pull request management. Without it,
    /// provisioning stops at the checkout.
    pub credential: Option<String>,
}

/// Point-in-time view of one session.
#[derive(Debug, Clone)]
pub struct SessionStatusReport {
    pub key: SessionKey,
    pub variant: BackendVariant,
    pub status: SessionStatus,
    pub last_error: Option<String>,
    pub workspace: Option<WorkspaceDescriptor>,
    pub pull_request: Option<PullRequestRecord>,
    pub message_count: usize,
}

/// Orchestrates sessions across backends.
pub struct SessionService {
    settings: Settings,
    registry: SessionRegistry,
    engine: Arc<dyn AgentEngine>,
    container_runtime: Arc<dyn ContainerRuntimeApi>,
    store: Arc<dyn SessionStore>,
    tracker: Arc<CommandTracker>,
    /// One lock per key, serializing open/reset so concurrent calls never
    /// provision the same workspace directory at once. Entries are retained
    /// for the service's lifetime.
    open_locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl SessionService {
    pub fn new(
        settings: Settings,
        engine: Arc<dyn AgentEngine>,
        container_runtime: Arc<dyn ContainerRuntimeApi>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            settings,
            registry: SessionRegistry::new(),
            engine,
            container_runtime,
            store,
            tracker: Arc::new(CommandTracker::new()),
            open_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn open_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        self.open_locks
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    pub fn tracker(&self) -> &Arc<CommandTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Open the session for `request.key`, creating it if absent.
    ///
    /// Opening is idempotent: an existing live session is returned as-is.
    /// For a new session the workspace is provisioned first (adopting any
    /// existing branch or pull request), then the backend is constructed and
    /// registered, and `start()` runs in the background so the caller gets
    /// the handle immediately in the Starting state.
    pub async fn open(&self, request: OpenSessionRequest) -> SessionResult<Arc<Session>> {
        if let Some(existing) = self.registry.get(&request.key).await {
            return Ok(existing);
        }

        // Serialize creation per key: concurrent git operations against the
        // same workspace directory would fail hard, not converge.
        let lock = self.open_lock(&request.key).await;
        let _guard = lock.lock().await;
        if let Some(existing) = self.registry.get(&request.key).await {
            return Ok(existing);
        }

        // Slow path: provision before taking the registry lock. Provisioning
        // is idempotent across calls, so a crash between provision and
        // registration leaves only adoptable state behind.
        let provisioner = WorkspaceProvisioner::from_settings(
            &self.settings.workspace,
            request.credential.clone(),
        );
        let provisioned = provisioner
            .provision(
                &request.repo_url,
                request.key.branch_name(),
                request.credential.as_deref(),
            )
            .await?;

        let messages: MessageLog = Arc::new(RwLock::new(Vec::new()));
        let sink: SharedEventSink = Arc::new(EventPipeline::new(
            messages.clone(),
            self.tracker.clone(),
            self.store.clone(),
        ));
        let backend = self.build_backend(
            &request.key,
            request.variant,
            &provisioned.workspace,
            sink,
        )?;

        let mut created = false;
        let session = self
            .registry
            .get_or_create(&request.key, || {
                created = true;
                Ok(Arc::new(Session::new(
                    request.key.clone(),
                    request.variant,
                    backend,
                    Some(provisioned.workspace.clone()),
                    provisioned.pull_request.clone(),
                    messages,
                )))
            })
            .await?;

        if created {
            self.persist(&session).await;
            self.spawn_start(&session);
        }
        Ok(session)
    }

    fn build_backend(
        &self,
        key: &SessionKey,
        variant: BackendVariant,
        workspace: &WorkspaceDescriptor,
        sink: SharedEventSink,
    ) -> SessionResult<Arc<dyn ExecutionBackend>> {
        let join_timeout = self.settings.session.join_timeout();
        let backend: Arc<dyn ExecutionBackend> = match variant {
            BackendVariant::Local => Arc::new(LocalBackend::new(
                key.clone(),
                self.engine.clone(),
                workspace.path.clone(),
                self.settings.session.system_prompt.clone(),
                sink,
                join_timeout,
            )),
            BackendVariant::Container => Arc::new(ContainerBackend::new(
                key.clone(),
                self.container_runtime.clone(),
                self.settings.container.clone(),
                workspace.path.clone(),
                sink,
                join_timeout,
            )),
            BackendVariant::Remote => {
                let api_key = self.settings.runtime.api_key.clone().ok_or_else(|| {
                    SessionError::Configuration(
                        "remote backend requires runtime.api_key".to_string(),
                    )
                })?;
                Arc::new(RemoteBackend::new(
                    key.clone(),
                    RuntimeLifecycleClient::new(self.settings.runtime.base_url.clone(), api_key),
                    self.settings.runtime.clone(),
                    sink,
                    join_timeout,
                ))
            }
        };
        Ok(backend)
    }

    /// Start the backend in the background; failures land in the session's
    /// Error state, which `start()` sets before returning.
    fn spawn_start(&self, session: &Arc<Session>) {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.backend().start().await {
                error!("Backend start for {} failed: {e}", session.key());
            }
        });
    }

    async fn persist(&self, session: &Arc<Session>) {
        let record = PersistedSession {
            key: session.key().clone(),
            variant: session.variant(),
            created_at: session.created_at(),
            status: session.status().await,
            workspace: session.workspace().cloned(),
            pull_request: session.pull_request().cloned(),
            last_error: session.last_error().await,
        };
        if let Err(e) = self.store.save_session(&record).await {
            warn!("Persisting session {} failed: {e}", session.key());
        }
    }

    /// Status for a session; `None` for unknown keys.
    pub async fn status(&self, key: &SessionKey) -> Option<SessionStatusReport> {
        let session = self.registry.get(key).await?;
        Some(SessionStatusReport {
            key: session.key().clone(),
            variant: session.variant(),
            status: session.status().await,
            last_error: session.last_error().await,
            workspace: session.workspace().cloned(),
            pull_request: session.pull_request().cloned(),
            message_count: session.messages().await.len(),
        })
    }

    /// Send free-form user text into a session.
    pub async fn send_message(&self, key: &SessionKey, text: &str) -> SessionResult<SendReceipt> {
        let session = self
            .registry
            .get(key)
            .await
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        session.backend().send_message(text).await
    }

    /// Send a categorized command, tracked for later status queries.
    ///
    /// The command is recorded before the send so a fast observation event
    /// always finds its record. Returns the command ID.
    pub async fn run_command(
        &self,
        key: &SessionKey,
        category: CommandCategory,
        command_text: &str,
    ) -> SessionResult<String> {
        let session = self
            .registry
            .get(key)
            .await
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        let command_id = self.tracker.track_sent(key, category, command_text).await;
        session.backend().send_message(command_text).await?;
        Ok(command_id)
    }

    /// Most recent tracked command for a category; `None` when none exists.
    pub async fn command_status(
        &self,
        key: &SessionKey,
        category: CommandCategory,
    ) -> Option<CommandRecord> {
        self.tracker.status(key, category).await
    }

    /// Normalized messages for a session; `None` for unknown keys.
    pub async fn messages(&self, key: &SessionKey) -> Option<Vec<Message>> {
        let session = self.registry.get(key).await?;
        Some(session.messages().await)
    }

    /// Raw backend events for a session; `None` for unknown keys.
    pub async fn events(&self, key: &SessionKey) -> Option<Vec<AgentEvent>> {
        let session = self.registry.get(key).await?;
        Some(session.backend().events().await)
    }

    /// Pause a session. `false` for unknown keys or unsupported backends.
    pub async fn pause(&self, key: &SessionKey) -> bool {
        match self.registry.get(key).await {
            Some(session) => session.backend().pause().await,
            None => false,
        }
    }

    /// Resume a paused session.
    pub async fn resume(&self, key: &SessionKey) -> bool {
        match self.registry.get(key).await {
            Some(session) => session.backend().resume().await,
            None => false,
        }
    }

    /// Close a session, releasing its backend. `false` when absent.
    pub async fn close(&self, key: &SessionKey) -> bool {
        self.registry.remove(key).await
    }

    /// Tear down and rebuild a session from its persisted record.
    ///
    /// The old backend is cleaned up and a fresh one is constructed over the
    /// already-provisioned workspace; no re-provisioning happens. The riff's
    /// message history survives in the store, the in-memory buffer starts
    /// empty.
    pub async fn reset(&self, key: &SessionKey) -> SessionResult<Arc<Session>> {
        let lock = self.open_lock(key).await;
        let _guard = lock.lock().await;
        let persisted = self
            .store
            .load_session(key)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        let workspace = persisted.workspace.clone().ok_or_else(|| {
            SessionError::Configuration(format!("session {key} has no provisioned workspace"))
        })?;

        self.registry.remove(key).await;

        let messages: MessageLog = Arc::new(RwLock::new(Vec::new()));
        let sink: SharedEventSink = Arc::new(EventPipeline::new(
            messages.clone(),
            self.tracker.clone(),
            self.store.clone(),
        ));
        let backend = self.build_backend(key, persisted.variant, &workspace, sink)?;

        let session = self
            .registry
            .get_or_create(key, || {
                Ok(Arc::new(Session::new(
                    key.clone(),
                    persisted.variant,
                    backend,
                    Some(workspace),
                    persisted.pull_request.clone(),
                    messages,
                )))
            })
            .await?;

        info!("Reset session {key}");
        self.persist(&session).await;
        self.spawn_start(&session);
        Ok(session)
    }

    /// Registry-wide statistics.
    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }
}
