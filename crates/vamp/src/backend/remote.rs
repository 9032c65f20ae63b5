//! Remote execution backend.
//!
//! Delegates runtime placement to the provisioning API, then talks to the
//! hosted runtime directly: conversation creation and message sends are
//! plain HTTP calls against the runtime's own URL, authenticated with the
//! per-session credential the provisioner handed back. Readiness is
//! two-phase (provisioner says running, runtime answers its own health
//! endpoint). Events arrive either over a persistent newline-delimited
//! JSON stream or, when streaming is disabled, through the same poll loop
//! the container backend uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vamp_protocol::AgentEvent;
use vamp_protocol::runner::API_KEY_HEADER;

use crate::engine::{EventSink, SharedEventSink};
use crate::runtime::RuntimeLifecycleClient;
use crate::session::{SessionError, SessionKey, SessionResult, SessionStatus};
use crate::settings::RuntimeSettings;

use super::container::poll_events;
use super::{BackendStatus, ExecutionBackend, RecordingSink, SendReceipt, StatusCell};

/// Backend running the agent on an externally hosted runtime.
pub struct RemoteBackend {
    key: SessionKey,
    client: RuntimeLifecycleClient,
    settings: RuntimeSettings,
    sink: Arc<RecordingSink>,
    status: Arc<StatusCell>,
    http: reqwest::Client,
    runtime_id: Mutex<Option<String>>,
    runtime_url: Mutex<Option<String>>,
    credential: Mutex<Option<String>>,
    streamer: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    join_timeout: Duration,
}

impl RemoteBackend {
    pub fn new(
        key: SessionKey,
        client: RuntimeLifecycleClient,
        settings: RuntimeSettings,
        sink: SharedEventSink,
        join_timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("vamp")
            .build()
            .unwrap_or_default();
        Self {
            key,
            client,
            settings,
            sink: RecordingSink::new(sink),
            status: Arc::new(StatusCell::new()),
            http,
            runtime_id: Mutex::new(None),
            runtime_url: Mutex::new(None),
            credential: Mutex::new(None),
            streamer: Mutex::new(None),
            cancel: CancellationToken::new(),
            join_timeout,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder, credential: &Option<String>) -> reqwest::RequestBuilder {
        match credential {
            Some(credential) => builder.header(API_KEY_HEADER, credential),
            None => builder,
        }
    }

    async fn launch(&self) -> SessionResult<()> {
        // The provisioner id must survive interpolation into URL paths, so
        // use the slug form rather than the slashed display form.
        let session_id = self.key.slug();
        let started = self.client.start(&session_id).await?;
        *self.runtime_id.lock().await = Some(started.runtime_id.clone());
        *self.credential.lock().await = started.credential.clone();

        let info = self
            .client
            .wait_until_ready_and_alive(
                &session_id,
                self.settings.ready_timeout(),
                self.settings.poll_interval(),
            )
            .await?;
        let url = info.url.ok_or_else(|| {
            SessionError::Backend("ready runtime reported no URL".to_string())
        })?;

        // Create the conversation resource on the runtime itself.
        let credential = self.credential.lock().await.clone();
        let resp = self
            .authed(
                self.http.post(format!("{url}/conversations")),
                &credential,
            )
            .json(&json!({ "session_id": session_id }))
            .send()
            .await
            .map_err(|e| SessionError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SessionError::Backend(format!(
                "runtime rejected conversation: {}",
                resp.status()
            )));
        }
        *self.runtime_url.lock().await = Some(url.clone());

        if self.settings.live_events {
            let mut streamer = self.streamer.lock().await;
            *streamer = Some(tokio::spawn(stream_events(
                self.key.clone(),
                self.http.clone(),
                url,
                credential,
                self.sink.clone(),
                self.cancel.clone(),
            )));
        }
        Ok(())
    }

    /// Poll-based fallback when live streaming is disabled.
    async fn ensure_poller(&self, url: String, credential: Option<String>) {
        let mut streamer = self.streamer.lock().await;
        if streamer.is_some() {
            return;
        }
        *streamer = Some(tokio::spawn(poll_events(
            self.key.clone(),
            self.http.clone(),
            url,
            credential,
            self.sink.clone(),
            self.cancel.clone(),
            Duration::from_secs(2),
        )));
        debug!("Spawned event poller for remote session {}", self.key);
    }
}

/// Reads newline-delimited JSON events from the runtime until the stream
/// closes or the stop token fires.
async fn stream_events(
    key: SessionKey,
    http: reqwest::Client,
    url: String,
    credential: Option<String>,
    sink: Arc<RecordingSink>,
    cancel: CancellationToken,
) {
    let endpoint = format!("{url}/events/stream");
    let mut request = http.get(&endpoint);
    if let Some(credential) = &credential {
        request = request.header(API_KEY_HEADER, credential);
    }
    let resp = match request.send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            warn!("Event stream for {key} refused: {}", resp.status());
            return;
        }
        Err(e) => {
            warn!("Event stream for {key} failed to connect: {e}");
            return;
        }
    };

    let mut body = resp.bytes_stream();
    let mut buffer = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = body.next() => match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    debug!("Event stream for {key} errored: {e}");
                    break;
                }
                None => break,
            },
        };
        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) => sink.deliver(&key, AgentEvent::from_value(value)).await,
                Err(e) => debug!("Unparseable stream line for {key}: {e}"),
            }
        }
    }
    debug!("Event stream for {key} closed");
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    async fn start(&self) -> SessionResult<()> {
        if self.status.state().await != SessionStatus::NotStarted {
            return Ok(());
        }
        self.status.set(SessionStatus::Starting).await;
        match self.launch().await {
            Ok(()) => {
                self.status.set(SessionStatus::Running).await;
                info!("Remote session {} running", self.key);
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
        let url = self
            .runtime_url
            .lock()
            .await
            .clone()
            .ok_or_else(|| SessionError::Backend("runtime URL unknown".to_string()))?;
        let credential = self.credential.lock().await.clone();

        let resp = self
            .authed(self.http.post(format!("{url}/messages")), &credential)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| SessionError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SessionError::Backend(format!(
                "runtime rejected message: {}",
                resp.status()
            )));
        }

        if !self.settings.live_events {
            self.ensure_poller(url, credential).await;
        }
        Ok(SendReceipt::new())
    }

    async fn status(&self) -> BackendStatus {
        self.status.get().await
    }

    async fn events(&self) -> Vec<AgentEvent> {
        self.sink.snapshot().await
    }

    async fn pause(&self) -> bool {
        if self.status.state().await != SessionStatus::Running {
            return false;
        }
        let Some(runtime_id) = self.runtime_id.lock().await.clone() else {
            return false;
        };
        match self.client.pause(&runtime_id).await {
            Ok(()) => {
                self.status.set(SessionStatus::Paused).await;
                true
            }
            Err(e) => {
                warn!("Pause of runtime {runtime_id} failed: {e}");
                false
            }
        }
    }

    async fn resume(&self) -> bool {
        if self.status.state().await != SessionStatus::Paused {
            return false;
        }
        let Some(runtime_id) = self.runtime_id.lock().await.clone() else {
            return false;
        };
        match self.client.resume(&runtime_id).await {
            Ok(()) => {
                self.status.set(SessionStatus::Running).await;
                true
            }
            Err(e) => {
                warn!("Resume of runtime {runtime_id} failed: {e}");
                false
            }
        }
    }

    async fn cleanup(&self) -> SessionResult<()> {
        self.cancel.cancel();
        if let Some(handle) = self.streamer.lock().await.take()
            && tokio::time::timeout(self.join_timeout, handle).await.is_err()
        {
            warn!("Event task for {} did not stop in time", self.key);
        }
        Ok(())
    }
}
