//! Container execution backend.
//!
//! Each session gets its own container: a free local port is allocated, a
//! per-session config artifact is written into the state directory and
//! mounted read-only, the image is pulled if absent, and the container is
//! launched with the workspace bind-mounted. Readiness is an HTTP health
//! probe at fixed one-second intervals with a bounded attempt budget; if
//! the budget is exhausted the container is stopped so nothing is left
//! orphaned. Messages go to the container synchronously; events come back
//! through a fixed-interval poll loop that forwards only unseen entries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vamp_protocol::AgentEvent;

use crate::container::{ContainerRuntimeApi, RunConfig};
use crate::engine::{EventSink, SharedEventSink};
use crate::session::{SessionError, SessionKey, SessionResult, SessionStatus};
use crate::settings::ContainerSettings;

use super::{BackendStatus, ExecutionBackend, RecordingSink, SendReceipt, StatusCell};

/// Port the execution service listens on inside the container.
const CONTAINER_PORT: u16 = 8080;

/// Backend running the agent in a local container.
pub struct ContainerBackend {
    key: SessionKey,
    runtime: Arc<dyn ContainerRuntimeApi>,
    settings: ContainerSettings,
    workspace: PathBuf,
    sink: Arc<RecordingSink>,
    status: Arc<StatusCell>,
    http: reqwest::Client,
    container_id: Mutex<Option<String>>,
    base_url: Mutex<Option<String>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    join_timeout: Duration,
}

impl ContainerBackend {
    pub fn new(
        key: SessionKey,
        runtime: Arc<dyn ContainerRuntimeApi>,
        settings: ContainerSettings,
        workspace: PathBuf,
        sink: SharedEventSink,
        join_timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("vamp")
            .build()
            .unwrap_or_default();
        Self {
            key,
            runtime,
            settings,
            workspace,
            sink: RecordingSink::new(sink),
            status: Arc::new(StatusCell::new()),
            http,
            container_id: Mutex::new(None),
            base_url: Mutex::new(None),
            poller: Mutex::new(None),
            cancel: CancellationToken::new(),
            join_timeout,
        }
    }

    fn container_name(&self) -> String {
        let raw = format!(
            "vamp-{}-{}-{}",
            self.key.user_id, self.key.app_slug, self.key.riff_slug
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    /// Write the per-session config artifact and return its path.
    fn write_config(&self, port: u16) -> SessionResult<PathBuf> {
        std::fs::create_dir_all(&self.settings.state_dir)
            .map_err(|e| SessionError::Configuration(format!("cannot create state dir: {e}")))?;
        let path = self
            .settings
            .state_dir
            .join(format!("{}.json", self.container_name()));
        let body = json!({
            "session": self.key,
            "workspace": "/workspace",
            "port": port,
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&body).unwrap_or_default())
            .map_err(|e| SessionError::Configuration(format!("cannot write config: {e}")))?;
        Ok(path)
    }

    async fn launch(&self) -> SessionResult<()> {
        let port = free_local_port()?;
        let config_path = self.write_config(port)?;

        if !self.runtime.image_exists(&self.settings.image).await? {
            info!("Image {} absent, pulling", self.settings.image);
            self.runtime.pull_image(&self.settings.image).await?;
        }

        let run_config = RunConfig::new(self.settings.image.clone())
            .name(self.container_name())
            .port(port, CONTAINER_PORT)
            .volume(self.workspace.clone(), "/workspace")
            .volume_ro(config_path, "/etc/vamp/session.json")
            .env("VAMP_SESSION", self.key.to_string());
        let container_id = self.runtime.run(&run_config).await?;
        *self.container_id.lock().await = Some(container_id.clone());

        let base_url = format!("http://127.0.0.1:{port}");
        if !self.wait_ready(&base_url).await {
            warn!(
                "Container {container_id} for {} never became ready, stopping it",
                self.key
            );
            if let Err(e) = self.runtime.stop(&container_id).await {
                warn!("Stopping unready container failed (ignored): {e}");
            }
            self.container_id.lock().await.take();
            return Err(SessionError::NotReady(format!(
                "container not ready after {} probes",
                self.settings.readiness_attempts
            )));
        }
        *self.base_url.lock().await = Some(base_url);
        Ok(())
    }

    /// Fixed-interval health probes with a bounded attempt budget.
    async fn wait_ready(&self, base_url: &str) -> bool {
        let endpoint = format!("{base_url}/health");
        for attempt in 1..=self.settings.readiness_attempts {
            match self.http.get(&endpoint).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Container for {} ready after {attempt} probes", self.key);
                    return true;
                }
                Ok(resp) => debug!("Readiness probe {attempt}: {}", resp.status()),
                Err(e) => debug!("Readiness probe {attempt}: {e}"),
            }
            tokio::time::sleep(self.settings.readiness_interval()).await;
        }
        false
    }

    /// Spawn the event poll loop on first send.
    async fn ensure_poller(&self, base_url: String) {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            return;
        }
        *poller = Some(tokio::spawn(poll_events(
            self.key.clone(),
            self.http.clone(),
            base_url,
            None,
            self.sink.clone(),
            self.cancel.clone(),
            self.settings.poll_interval(),
        )));
        debug!("Spawned event poller for {}", self.key);
    }
}

fn free_local_port() -> SessionResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| SessionError::Backend(format!("cannot allocate local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| SessionError::Backend(format!("cannot read local port: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}

/// Fetches the backend's event list and forwards entries not yet seen.
///
/// Shared with the remote backend's non-streaming mode, which passes a
/// session credential.
pub(super) async fn poll_events(
    key: SessionKey,
    http: reqwest::Client,
    base_url: String,
    credential: Option<String>,
    sink: Arc<RecordingSink>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let endpoint = format!("{base_url}/events");
    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let mut request = http.get(&endpoint);
        if let Some(credential) = &credential {
            request = request.header(vamp_protocol::runner::API_KEY_HEADER, credential);
        }
        let values = match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<Vec<serde_json::Value>>().await {
                    Ok(values) => values,
                    Err(e) => {
                        debug!("Event poll parse error for {key}: {e}");
                        continue;
                    }
                }
            }
            Ok(resp) => {
                debug!("Event poll for {key}: {}", resp.status());
                continue;
            }
            Err(e) => {
                debug!("Event poll for {key}: {e}");
                continue;
            }
        };
        if values.len() > seen {
            for value in values.into_iter().skip(seen) {
                seen += 1;
                sink.deliver(&key, AgentEvent::from_value(value)).await;
            }
        }
    }
    debug!("Event poller for {key} exited");
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    async fn start(&self) -> SessionResult<()> {
        if self.status.state().await != SessionStatus::NotStarted {
            return Ok(());
        }
        self.status.set(SessionStatus::Starting).await;
        match self.launch().await {
            Ok(()) => {
                self.status.set(SessionStatus::Running).await;
                info!("Container session {} running", self.key);
                Ok(())
            }
            Err(e) => {
                self.status.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn send_message(&self, text: &str) -> SessionResult<SendReceipt> {
        match self.status.state().await {
            SessionStatus::Running => {}
            SessionStatus::Paused => {
                return Err(SessionError::NotReady("session is paused".to_string()));
            }
            other => {
                return Err(SessionError::Backend(format!(
                    "cannot send in state {other}"
                )));
            }
        }
        let base_url = self
            .base_url
            .lock()
            .await
            .clone()
            .ok_or_else(|| SessionError::Backend("container URL unknown".to_string()))?;

        let resp = self
            .http
            .post(format!("{base_url}/messages"))
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| SessionError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SessionError::Backend(format!(
                "container rejected message: {}",
                resp.status()
            )));
        }

        self.ensure_poller(base_url).await;
        Ok(SendReceipt::new())
    }

    async fn status(&self) -> BackendStatus {
        self.status.get().await
    }

    async fn events(&self) -> Vec<AgentEvent> {
        self.sink.snapshot().await
    }

    async fn pause(&self) -> bool {
        // Container suspension is not supported.
        false
    }

    async fn resume(&self) -> bool {
        false
    }

    async fn cleanup(&self) -> SessionResult<()> {
        self.cancel.cancel();
        if let Some(handle) = self.poller.lock().await.take()
            && tokio::time::timeout(self.join_timeout, handle).await.is_err()
        {
            warn!("Event poller for {} did not stop in time", self.key);
        }
        if let Some(container_id) = self.container_id.lock().await.take() {
            if let Err(e) = self.runtime.stop(&container_id).await {
                warn!("Stopping container {container_id} failed (ignored): {e}");
            } else {
                info!("Stopped container {container_id} for {}", self.key);
            }
        }
        Ok(())
    }
}
