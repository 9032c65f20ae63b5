//! In-process backend: strict send ordering and failure capture.

mod common;

use std::time::Duration;

use vamp::backend::{ExecutionBackend, LocalBackend};
use vamp::session::{SessionError, SessionStatus};

use common::{StubEngine, eventually, key, pipeline};

fn local_backend(engine: std::sync::Arc<StubEngine>, sink: vamp::engine::SharedEventSink) -> LocalBackend {
    LocalBackend::new(
        key(),
        engine,
        std::env::temp_dir(),
        "test prompt".to_string(),
        sink,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_messages_execute_in_submission_order() {
    common::init();
    let engine = StubEngine::with_delay(Duration::from_millis(50));
    let harness = pipeline();
    let backend = local_backend(engine.clone(), harness.sink.clone());

    backend.start().await.unwrap();
    // Both sends return immediately; processing happens in order behind them.
    backend.send_message("first").await.unwrap();
    backend.send_message("second").await.unwrap();
    backend.send_message("third").await.unwrap();

    let processed = engine.processed.clone();
    assert!(
        eventually(
            async || processed.lock().await.len() == 3,
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(*engine.processed.lock().await, ["first", "second", "third"]);

    // Normalized messages arrived in the same order.
    let log = harness.log.read().await;
    let contents: Vec<_> = log.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["echo: first", "echo: second", "echo: third"]);
}

#[tokio::test]
async fn test_send_before_start_is_rejected() {
    common::init();
    let harness = pipeline();
    let backend = local_backend(StubEngine::new(), harness.sink);

    let err = backend.send_message("hello").await.unwrap_err();
    assert!(matches!(err, SessionError::Backend(_)));
}

#[tokio::test]
async fn test_engine_failure_lands_in_error_state() {
    common::init();
    let harness = pipeline();
    let backend = local_backend(StubEngine::failing_on("boom"), harness.sink);

    backend.start().await.unwrap();
    backend.send_message("boom").await.unwrap();

    assert!(
        eventually(
            async || backend.status().await.state == SessionStatus::Error,
            Duration::from_secs(5)
        )
        .await
    );
    let status = backend.status().await;
    assert!(status.detail.unwrap().contains("scripted failure"));
}

#[tokio::test]
async fn test_engine_panic_is_captured_not_fatal() {
    common::init();
    let harness = pipeline();
    let backend = local_backend(StubEngine::panicking_on("kaboom"), harness.sink);

    backend.start().await.unwrap();
    backend.send_message("kaboom").await.unwrap();

    assert!(
        eventually(
            async || backend.status().await.state == SessionStatus::Error,
            Duration::from_secs(5)
        )
        .await
    );
    let status = backend.status().await;
    assert!(status.detail.unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_raw_events_are_recorded_in_order() {
    common::init();
    let harness = pipeline();
    let backend = local_backend(StubEngine::new(), harness.sink);

    backend.start().await.unwrap();
    backend.send_message("a").await.unwrap();
    backend.send_message("b").await.unwrap();

    assert!(
        eventually(
            async || backend.events().await.len() == 2,
            Duration::from_secs(5)
        )
        .await
    );
    let events = backend.events().await;
    assert_eq!(events[0].kind_name(), "assistant_message");
}

#[tokio::test]
async fn test_start_is_idempotent() {
    common::init();
    let harness = pipeline();
    let backend = local_backend(StubEngine::new(), harness.sink);

    backend.start().await.unwrap();
    backend.start().await.unwrap();
    assert_eq!(backend.status().await.state, SessionStatus::Running);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    common::init();
    let harness = pipeline();
    let backend = local_backend(StubEngine::new(), harness.sink);

    backend.start().await.unwrap();
    backend.send_message("a").await.unwrap();
    backend.cleanup().await.unwrap();
    backend.cleanup().await.unwrap();
}
