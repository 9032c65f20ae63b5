//! Hosted runtime lifecycle client.
//!
//! Talks to the runtime provisioning API to start, inspect, pause and
//! resume hosted runtimes. Readiness is two-phase: the provisioning API
//! must report the runtime running, and the runtime itself must answer
//! its own health endpoint. Only when both hold is a runtime considered
//! usable; a deadline that expires with either phase unmet is reported
//! as a timeout, distinct from a hard provisioning failure.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;
use vamp_protocol::runner::{
    API_KEY_HEADER, HealthResponse, RuntimeControlRequest, RuntimeInfo, RuntimeState,
    StartRuntimeRequest, StartRuntimeResponse,
};

/// Result type for runtime lifecycle operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors from the runtime provisioning API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid or missing client configuration.
    #[error("runtime configuration error: {0}")]
    Configuration(String),

    /// The provisioning API reported the runtime failed.
    #[error("runtime provisioning failed for {session_id}: {detail}")]
    Provisioning { session_id: String, detail: String },

    /// The runtime did not become ready and alive within the deadline.
    #[error("runtime for {session_id} not ready after {waited:?}")]
    ReadinessTimeout {
        session_id: String,
        waited: Duration,
    },

    /// The provisioning API rejected a request.
    #[error("runtime API error: {0}")]
    Api(String),

    /// A retryable network failure that survived its retry budget.
    #[error("transient runtime API failure: {0}")]
    Transient(String),
}

const STATUS_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Client for the hosted runtime provisioning API.
#[derive(Debug, Clone)]
pub struct RuntimeLifecycleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RuntimeLifecycleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("vamp")
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// Request a new runtime for `session_id`.
    pub async fn start(&self, session_id: &str) -> RuntimeResult<StartRuntimeResponse> {
        let resp = self
            .request(reqwest::Method::POST, "/start")
            .json(&StartRuntimeRequest {
                session_id: session_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RuntimeError::Api(format!(
                "start {session_id}: {}",
                resp.status()
            )));
        }
        let started = resp
            .json::<StartRuntimeResponse>()
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        info!("Requested runtime {} for {session_id}", started.runtime_id);
        Ok(started)
    }

    /// Current provisioning state for a session's runtime.
    ///
    /// Idempotent read; transient failures get a bounded fixed-delay retry.
    pub async fn status(&self, session_id: &str) -> RuntimeResult<RuntimeInfo> {
        let path = format!("/sessions/{session_id}");
        let mut last_err = String::new();
        for attempt in 0..=STATUS_RETRIES {
            if attempt > 0 {
                warn!("Retrying runtime status for {session_id}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            match self.request(reqwest::Method::GET, &path).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<RuntimeInfo>()
                        .await
                        .map_err(|e| RuntimeError::Api(e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("status {session_id}: {}", resp.status());
                }
                Ok(resp) => {
                    return Err(RuntimeError::Api(format!(
                        "status {session_id}: {}",
                        resp.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = e.to_string();
                }
                Err(e) => return Err(RuntimeError::Api(e.to_string())),
            }
        }
        Err(RuntimeError::Transient(last_err))
    }

    /// Ask the provisioning API to pause a runtime.
    pub async fn pause(&self, runtime_id: &str) -> RuntimeResult<()> {
        self.control("/pause", runtime_id).await
    }

    /// Ask the provisioning API to resume a paused runtime.
    pub async fn resume(&self, runtime_id: &str) -> RuntimeResult<()> {
        self.control("/resume", runtime_id).await
    }

    async fn control(&self, path: &str, runtime_id: &str) -> RuntimeResult<()> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(&RuntimeControlRequest {
                runtime_id: runtime_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RuntimeError::Api(format!(
                "{path} {runtime_id}: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Provisioning API health check.
    pub async fn health(&self) -> RuntimeResult<HealthResponse> {
        let resp = self
            .request(reqwest::Method::GET, "/health")
            .send()
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RuntimeError::Api(format!("health: {}", resp.status())));
        }
        resp.json::<HealthResponse>()
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))
    }

    /// Probe a runtime's own health endpoint directly.
    async fn runtime_alive(&self, url: &str) -> bool {
        let endpoint = format!("{}/health", url.trim_end_matches('/'));
        match self.http.get(&endpoint).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Runtime liveness probe failed: {e}");
                false
            }
        }
    }

    /// Poll until the runtime is both provisioned-running and answering its
    /// own health endpoint.
    ///
    /// `RuntimeState::Failed` aborts immediately with a provisioning error;
    /// deadline expiry yields `ReadinessTimeout` whether the missing piece
    /// was provisioning state or liveness.
    pub async fn wait_until_ready_and_alive(
        &self,
        session_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> RuntimeResult<RuntimeInfo> {
        let started = Instant::now();
        loop {
            let info = self.status(session_id).await?;
            match info.state {
                RuntimeState::Failed => {
                    return Err(RuntimeError::Provisioning {
                        session_id: session_id.to_string(),
                        detail: "provisioner reported runtime failed".to_string(),
                    });
                }
                RuntimeState::Running => {
                    if let Some(url) = &info.url {
                        if self.runtime_alive(url).await {
                            info!(
                                "Runtime {} ready and alive after {:?}",
                                info.runtime_id,
                                started.elapsed()
                            );
                            return Ok(info);
                        }
                        debug!("Runtime {} running but not yet alive", info.runtime_id);
                    }
                }
                state => debug!("Runtime for {session_id} still {state:?}"),
            }
            if started.elapsed() >= timeout {
                return Err(RuntimeError::ReadinessTimeout {
                    session_id: session_id.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
