//! Container backend: launch, readiness, event polling, teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use vamp::backend::{ContainerBackend, ExecutionBackend};
use vamp::session::{SessionError, SessionStatus};
use vamp::settings::ContainerSettings;

use common::{FakeContainerRuntime, eventually, key, pipeline};

fn settings(state_dir: &std::path::Path) -> ContainerSettings {
    ContainerSettings {
        image: "vamp-exec:test".to_string(),
        state_dir: state_dir.to_path_buf(),
        readiness_attempts: 10,
        readiness_interval_secs: 0,
        poll_interval_secs: 1,
    }
}

fn backend(
    runtime: Arc<FakeContainerRuntime>,
    settings: ContainerSettings,
    workspace: &std::path::Path,
    sink: vamp::engine::SharedEventSink,
) -> ContainerBackend {
    ContainerBackend::new(
        key(),
        runtime,
        settings,
        workspace.to_path_buf(),
        sink,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_start_reaches_running_and_writes_config() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeContainerRuntime::new();
    let harness = pipeline();
    let backend = backend(runtime.clone(), settings(dir.path()), dir.path(), harness.sink);

    backend.start().await.unwrap();
    assert_eq!(backend.status().await.state, SessionStatus::Running);

    // The per-session config artifact landed in the state dir.
    let config = dir.path().join("vamp-alice-widget-feature-x.json");
    assert!(config.exists());
    let body: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&config).unwrap()).unwrap();
    assert_eq!(body["workspace"], "/workspace");
}

#[tokio::test]
async fn test_message_round_trip_through_poll_loop() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeContainerRuntime::new();
    let harness = pipeline();
    let backend = backend(runtime.clone(), settings(dir.path()), dir.path(), harness.sink);

    backend.start().await.unwrap();
    backend.send_message("hello container").await.unwrap();

    // The fake container recorded the message synchronously.
    assert_eq!(
        *runtime.app.messages.lock().await,
        ["hello container"]
    );

    // The poll loop picks up the echoed event and the pipeline normalizes it.
    let log = harness.log.clone();
    assert!(
        eventually(
            async || !log.read().await.is_empty(),
            Duration::from_secs(10)
        )
        .await
    );
    assert_eq!(harness.log.read().await[0].content, "echo: hello container");
    assert_eq!(backend.events().await.len(), 1);
}

#[tokio::test]
async fn test_poll_loop_forwards_only_new_events() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeContainerRuntime::new();
    let harness = pipeline();
    let backend = backend(runtime.clone(), settings(dir.path()), dir.path(), harness.sink);

    backend.start().await.unwrap();
    backend.send_message("one").await.unwrap();
    let log = harness.log.clone();
    assert!(
        eventually(
            async || log.read().await.len() == 1,
            Duration::from_secs(10)
        )
        .await
    );

    backend.send_message("two").await.unwrap();
    assert!(
        eventually(
            async || log.read().await.len() == 2,
            Duration::from_secs(10)
        )
        .await
    );
    // No duplicates from re-reading the full event list.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.log.read().await.len(), 2);
}

#[tokio::test]
async fn test_readiness_exhaustion_fails_start_and_stops_container() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeContainerRuntime::unready();
    let harness = pipeline();
    let mut settings = settings(dir.path());
    settings.readiness_attempts = 3;
    let backend = backend(runtime.clone(), settings, dir.path(), harness.sink);

    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, SessionError::NotReady(_)));
    assert_eq!(backend.status().await.state, SessionStatus::Error);

    // The unready container was stopped, not orphaned.
    assert_eq!(*runtime.stopped.lock().await, ["container-0"]);
}

#[tokio::test]
async fn test_missing_image_is_pulled_once() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let mut runtime = FakeContainerRuntime::new();
    Arc::get_mut(&mut runtime).unwrap().image_present = false;
    let harness = pipeline();
    let backend = backend(runtime.clone(), settings(dir.path()), dir.path(), harness.sink);

    backend.start().await.unwrap();
    assert_eq!(
        runtime.pull_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_cleanup_stops_container_once() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeContainerRuntime::new();
    let harness = pipeline();
    let backend = backend(runtime.clone(), settings(dir.path()), dir.path(), harness.sink);

    backend.start().await.unwrap();
    backend.cleanup().await.unwrap();
    backend.cleanup().await.unwrap();
    assert_eq!(runtime.stopped.lock().await.len(), 1);
}
