//! Test utilities: stub engine, fake container runtime, and fake HTTP
//! services for the hosting and runtime provisioning APIs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use vamp::backend::{BackendStatus, ExecutionBackend, SendReceipt};
use vamp::container::{ContainerRuntimeApi, ContainerResult, RunConfig};
use vamp::engine::{
    AgentConversation, AgentEngine, ConversationState, EngineError, EngineResult, SharedEventSink,
};
use vamp::observability::init_logging;
use vamp::session::{SessionKey, SessionResult, SessionStatus};
use vamp_protocol::AgentEvent;
use vamp_protocol::runner::{
    HealthResponse, RuntimeInfo, StartRuntimeRequest, StartRuntimeResponse,
};

pub fn init() {
    init_logging();
}

pub fn key() -> SessionKey {
    SessionKey::new("alice", "widget", "feature-x")
}

/// Poll `check` until it returns true or `timeout` expires.
pub async fn eventually<F>(mut check: F, timeout: Duration) -> bool
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// A full event pipeline with in-memory collaborators, for backend tests.
pub struct PipelineHarness {
    pub log: vamp::session::MessageLog,
    pub tracker: Arc<vamp::commands::CommandTracker>,
    pub store: Arc<vamp::storage::MemoryStore>,
    pub sink: SharedEventSink,
}

pub fn pipeline() -> PipelineHarness {
    let log: vamp::session::MessageLog = Arc::new(tokio::sync::RwLock::new(Vec::new()));
    let tracker = Arc::new(vamp::commands::CommandTracker::new());
    let store = vamp::storage::MemoryStore::shared();
    let sink: SharedEventSink = Arc::new(vamp::pipeline::EventPipeline::new(
        log.clone(),
        tracker.clone(),
        store.clone(),
    ));
    PipelineHarness {
        log,
        tracker,
        store,
        sink,
    }
}

/// Bind a router on an ephemeral port; returns its base URL.
pub async fn spawn_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Stub agent engine

/// Scripted in-process engine: echoes each message as an assistant event and
/// records processing order. Can be told to fail or panic on a marker text.
pub struct StubEngine {
    pub processed: Arc<Mutex<Vec<String>>>,
    pub delay: Duration,
    pub fail_on: Option<String>,
    pub panic_on: Option<String>,
}

impl StubEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            processed: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(0),
            fail_on: None,
            panic_on: None,
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            processed: Arc::new(Mutex::new(Vec::new())),
            delay,
            fail_on: None,
            panic_on: None,
        })
    }

    pub fn failing_on(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            processed: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(0),
            fail_on: Some(marker.to_string()),
            panic_on: None,
        })
    }

    pub fn panicking_on(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            processed: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(0),
            fail_on: None,
            panic_on: Some(marker.to_string()),
        })
    }
}

#[async_trait]
impl AgentEngine for StubEngine {
    async fn create_conversation(
        &self,
        key: &SessionKey,
        _workspace: &std::path::Path,
        _system_prompt: &str,
        sink: SharedEventSink,
    ) -> EngineResult<Box<dyn AgentConversation>> {
        Ok(Box::new(StubConversation {
            key: key.clone(),
            sink,
            processed: self.processed.clone(),
            delay: self.delay,
            fail_on: self.fail_on.clone(),
            panic_on: self.panic_on.clone(),
            pending: None,
            state: ConversationState::Idle,
        }))
    }
}

struct StubConversation {
    key: SessionKey,
    sink: SharedEventSink,
    processed: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail_on: Option<String>,
    panic_on: Option<String>,
    pending: Option<String>,
    state: ConversationState,
}

#[async_trait]
impl AgentConversation for StubConversation {
    async fn send_message(&mut self, text: &str) -> EngineResult<()> {
        self.pending = Some(text.to_string());
        Ok(())
    }

    async fn run(&mut self) -> EngineResult<()> {
        let Some(text) = self.pending.take() else {
            return Ok(());
        };
        self.state = ConversationState::Running;
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_on.as_deref() == Some(text.as_str()) {
            panic!("scripted panic");
        }
        if self.fail_on.as_deref() == Some(text.as_str()) {
            self.state = ConversationState::Failed;
            return Err(EngineError::Internal(format!("scripted failure on {text}")));
        }
        self.processed.lock().await.push(text.clone());
        self.sink
            .deliver(
                &self.key,
                AgentEvent::AssistantMessage {
                    text: format!("echo: {text}"),
                },
            )
            .await;
        self.state = ConversationState::Idle;
        Ok(())
    }

    fn state(&self) -> ConversationState {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Minimal backend for registry-level tests

/// Backend that does nothing but count its cleanups.
pub struct CountingBackend {
    pub cleanup_calls: Arc<AtomicUsize>,
    pub fail_cleanup: bool,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cleanup_calls: Arc::new(AtomicUsize::new(0)),
            fail_cleanup: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            cleanup_calls: Arc::new(AtomicUsize::new(0)),
            fail_cleanup: true,
        })
    }
}

#[async_trait]
impl ExecutionBackend for CountingBackend {
    async fn start(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn send_message(&self, _text: &str) -> SessionResult<SendReceipt> {
        Ok(SendReceipt::new())
    }

    async fn status(&self) -> BackendStatus {
        BackendStatus::new(SessionStatus::Running)
    }

    async fn events(&self) -> Vec<AgentEvent> {
        Vec::new()
    }

    async fn pause(&self) -> bool {
        false
    }

    async fn resume(&self) -> bool {
        false
    }

    async fn cleanup(&self) -> SessionResult<()> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(vamp::session::SessionError::Backend(
                "scripted cleanup failure".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake hosting API (GitHub-style)

#[derive(Debug, Clone, serde::Serialize)]
pub struct FakePull {
    pub number: u64,
    pub html_url: String,
    pub state: String,
    pub draft: bool,
    pub head: String,
    pub title: String,
}

#[derive(Default)]
pub struct HostingState {
    pub pulls: Mutex<Vec<FakePull>>,
    pub create_pr_calls: AtomicUsize,
    pub next_number: AtomicUsize,
}

impl HostingState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pulls: Mutex::new(Vec::new()),
            create_pr_calls: AtomicUsize::new(0),
            next_number: AtomicUsize::new(1),
        })
    }
}

async fn hosting_repo(AxumPath((_, _)): AxumPath<(String, String)>) -> Json<Value> {
    Json(json!({ "default_branch": "main" }))
}

async fn hosting_list_pulls(
    State(state): State<Arc<HostingState>>,
    AxumPath((_, _)): AxumPath<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let head_branch = params
        .get("head")
        .map(|h| h.split(':').next_back().unwrap_or(h).to_string());
    let want_state = params.get("state").cloned().unwrap_or("open".to_string());
    let pulls = state.pulls.lock().await;
    let matched: Vec<&FakePull> = pulls
        .iter()
        .filter(|p| {
            (want_state == "all" || p.state == want_state)
                && head_branch.as_deref().is_none_or(|b| p.head == b)
        })
        .collect();
    Json(serde_json::to_value(matched).unwrap())
}

async fn hosting_create_pull(
    State(state): State<Arc<HostingState>>,
    AxumPath((owner, repo)): AxumPath<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.create_pr_calls.fetch_add(1, Ordering::SeqCst);
    let number = state.next_number.fetch_add(1, Ordering::SeqCst) as u64;
    let pull = FakePull {
        number,
        html_url: format!("http://hosting.test/{owner}/{repo}/pull/{number}"),
        state: "open".to_string(),
        draft: body["draft"].as_bool().unwrap_or(false),
        head: body["head"].as_str().unwrap_or_default().to_string(),
        title: body["title"].as_str().unwrap_or_default().to_string(),
    };
    let value = serde_json::to_value(&pull).unwrap();
    state.pulls.lock().await.push(pull);
    (StatusCode::CREATED, Json(value))
}

/// Fake hosting API; returns (base_url, state).
pub async fn spawn_hosting_api() -> (String, Arc<HostingState>) {
    let state = HostingState::new();
    let router = Router::new()
        .route("/repos/{owner}/{repo}", get(hosting_repo))
        .route(
            "/repos/{owner}/{repo}/pulls",
            get(hosting_list_pulls).post(hosting_create_pull),
        )
        .with_state(state.clone());
    (spawn_router(router).await, state)
}

// ---------------------------------------------------------------------------
// Fake runtime provisioning API

pub struct ProvisionerState {
    /// Scripted status responses; the last one repeats once drained.
    pub statuses: Mutex<Vec<RuntimeInfo>>,
    /// Session ids seen on POST /start.
    pub started: Mutex<Vec<String>>,
    pub pause_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
}

impl ProvisionerState {
    pub fn scripted(statuses: Vec<RuntimeInfo>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses),
            started: Mutex::new(Vec::new()),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
        })
    }
}

async fn provisioner_start(
    State(state): State<Arc<ProvisionerState>>,
    Json(req): Json<StartRuntimeRequest>,
) -> Json<StartRuntimeResponse> {
    state.started.lock().await.push(req.session_id.clone());
    Json(StartRuntimeResponse {
        runtime_id: format!("rt-{}", req.session_id),
        credential: Some("test-credential".to_string()),
    })
}

async fn provisioner_status(
    State(state): State<Arc<ProvisionerState>>,
    AxumPath(_id): AxumPath<String>,
) -> Json<RuntimeInfo> {
    let mut statuses = state.statuses.lock().await;
    let info = if statuses.len() > 1 {
        statuses.remove(0)
    } else {
        statuses[0].clone()
    };
    Json(info)
}

async fn provisioner_pause(State(state): State<Arc<ProvisionerState>>) -> StatusCode {
    state.pause_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn provisioner_resume(State(state): State<Arc<ProvisionerState>>) -> StatusCode {
    state.resume_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn provisioner_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// Fake provisioning API with a scripted status sequence.
pub async fn spawn_provisioning_api(state: Arc<ProvisionerState>) -> String {
    let router = Router::new()
        .route("/start", post(provisioner_start))
        .route("/sessions/{id}", get(provisioner_status))
        .route("/pause", post(provisioner_pause))
        .route("/resume", post(provisioner_resume))
        .route("/health", get(provisioner_health))
        .with_state(state);
    spawn_router(router).await
}

// ---------------------------------------------------------------------------
// Fake hosted runtime / container application

/// State of a fake agent HTTP application (hosted runtime or container).
pub struct AgentAppState {
    pub alive: AtomicBool,
    pub messages: Mutex<Vec<String>>,
    pub events: Mutex<Vec<Value>>,
    pub conversations: AtomicUsize,
    pub stream_tx: tokio::sync::broadcast::Sender<String>,
}

impl AgentAppState {
    pub fn new(alive: bool) -> Arc<Self> {
        let (stream_tx, _) = tokio::sync::broadcast::channel(64);
        Arc::new(Self {
            alive: AtomicBool::new(alive),
            messages: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            conversations: AtomicUsize::new(0),
            stream_tx,
        })
    }
}

async fn app_health(State(state): State<Arc<AgentAppState>>) -> StatusCode {
    if state.alive.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn app_create_conversation(State(state): State<Arc<AgentAppState>>) -> StatusCode {
    state.conversations.fetch_add(1, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn app_send_message(
    State(state): State<Arc<AgentAppState>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    state.messages.lock().await.push(text.clone());
    let event = json!({ "kind": "assistant_message", "text": format!("echo: {text}") });
    state.events.lock().await.push(event.clone());
    let _ = state.stream_tx.send(format!("{event}\n"));
    StatusCode::ACCEPTED
}

async fn app_events(State(state): State<Arc<AgentAppState>>) -> Json<Vec<Value>> {
    Json(state.events.lock().await.clone())
}

async fn app_event_stream(State(state): State<Arc<AgentAppState>>) -> impl IntoResponse {
    let rx = state.stream_tx.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(line) => Some((Ok::<String, std::io::Error>(line), rx)),
            Err(_) => None,
        }
    });
    axum::body::Body::from_stream(stream)
}

fn agent_app_router(state: Arc<AgentAppState>) -> Router {
    Router::new()
        .route("/health", get(app_health))
        .route("/conversations", post(app_create_conversation))
        .route("/messages", post(app_send_message))
        .route("/events", get(app_events))
        .route("/events/stream", get(app_event_stream))
        .with_state(state)
}

/// Fake hosted runtime; returns (base_url, state).
pub async fn spawn_agent_app(alive: bool) -> (String, Arc<AgentAppState>) {
    let state = AgentAppState::new(alive);
    (spawn_router(agent_app_router(state.clone())).await, state)
}

// ---------------------------------------------------------------------------
// Fake container runtime

/// Container runtime that "launches" a real HTTP server on the requested
/// host port instead of a container.
pub struct FakeContainerRuntime {
    /// When false, launched containers never answer their health endpoint.
    pub healthy: bool,
    pub image_present: bool,
    pub pull_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub stopped: Mutex<Vec<String>>,
    pub app: Arc<AgentAppState>,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: true,
            image_present: true,
            pull_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            stopped: Mutex::new(Vec::new()),
            app: AgentAppState::new(true),
            servers: Mutex::new(Vec::new()),
        })
    }

    pub fn unready() -> Arc<Self> {
        Arc::new(Self {
            healthy: false,
            image_present: true,
            pull_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            stopped: Mutex::new(Vec::new()),
            app: AgentAppState::new(false),
            servers: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ContainerRuntimeApi for FakeContainerRuntime {
    async fn image_exists(&self, _image: &str) -> ContainerResult<bool> {
        Ok(self.image_present)
    }

    async fn pull_image(&self, _image: &str) -> ContainerResult<()> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, config: &RunConfig) -> ContainerResult<String> {
        let run_index = self.run_calls.fetch_add(1, Ordering::SeqCst);
        let (host_port, _) = config.ports.first().copied().unwrap_or((0, 0));
        if self.healthy {
            let router = agent_app_router(self.app.clone());
            let listener =
                tokio::net::TcpListener::bind(("127.0.0.1", host_port)).await?;
            let handle = tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });
            self.servers.lock().await.push(handle);
        }
        Ok(format!("container-{run_index}"))
    }

    async fn stop(&self, container_id: &str) -> ContainerResult<()> {
        self.stopped.lock().await.push(container_id.to_string());
        for handle in self.servers.lock().await.drain(..) {
            handle.abort();
        }
        Ok(())
    }
}
