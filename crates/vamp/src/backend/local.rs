//! In-process execution backend.
//!
//! Runs the agent engine inside this process. A single consumer task per
//! session drains an mpsc queue, so messages execute strictly in submission
//! order. The worker is spawned lazily on the first send and joined with a
//! bounded timeout during cleanup. Engine failures and panics land in the
//! session's Error state instead of taking the process down.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vamp_protocol::AgentEvent;

use crate::engine::{AgentConversation, AgentEngine, ConversationState, SharedEventSink};
use crate::session::{SessionError, SessionKey, SessionResult, SessionStatus};

use super::{BackendStatus, ExecutionBackend, RecordingSink, SendReceipt, StatusCell};

/// Backend running the agent engine in-process.
pub struct LocalBackend {
    key: SessionKey,
    engine: Arc<dyn AgentEngine>,
    workspace: PathBuf,
    system_prompt: String,
    sink: Arc<RecordingSink>,
    status: Arc<StatusCell>,
    conversation: Mutex<Option<Box<dyn AgentConversation>>>,
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    join_timeout: Duration,
}

impl LocalBackend {
    pub fn new(
        key: SessionKey,
        engine: Arc<dyn AgentEngine>,
        workspace: PathBuf,
        system_prompt: String,
        sink: SharedEventSink,
        join_timeout: Duration,
    ) -> Self {
        Self {
            key,
            engine,
            workspace,
            system_prompt,
            sink: RecordingSink::new(sink),
            status: Arc::new(StatusCell::new()),
            conversation: Mutex::new(None),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
            join_timeout,
        }
    }

    /// Spawn the consumer task on first send.
    async fn ensure_worker(&self) -> SessionResult<mpsc::UnboundedSender<String>> {
        let mut tx_slot = self.tx.lock().await;
        if let Some(tx) = tx_slot.as_ref() {
            return Ok(tx.clone());
        }

        let conversation = self.conversation.lock().await.take().ok_or_else(|| {
            SessionError::Backend("conversation not initialized; was start() called?".to_string())
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker_loop(
            self.key.clone(),
            conversation,
            rx,
            self.status.clone(),
            self.cancel.clone(),
        ));
        *self.worker.lock().await = Some(handle);
        *tx_slot = Some(tx.clone());
        debug!("Spawned local worker for {}", self.key);
        Ok(tx)
    }
}

/// Drains queued messages one at a time, in order.
async fn worker_loop(
    key: SessionKey,
    mut conversation: Box<dyn AgentConversation>,
    mut rx: mpsc::UnboundedReceiver<String>,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
) {
    loop {
        let text = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(text) => text,
                None => break,
            },
        };

        let outcome = AssertUnwindSafe(async {
            conversation.send_message(&text).await?;
            conversation.run().await
        })
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(())) => {
                if conversation.state() == ConversationState::Completed {
                    status.set(SessionStatus::Completed).await;
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!("Engine failure in session {key}: {e}");
                status.fail(e.to_string()).await;
                break;
            }
            Err(_) => {
                error!("Engine panicked in session {key}");
                status.fail("engine panicked while processing a message").await;
                break;
            }
        }
    }
    debug!("Local worker for {key} exited");
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    async fn start(&self) -> SessionResult<()> {
        if self.status.state().await != SessionStatus::NotStarted {
            return Ok(());
        }
        self.status.set(SessionStatus::Starting).await;

        let sink: SharedEventSink = self.sink.clone();
        let conversation = match self
            .engine
            .create_conversation(&self.key, &self.workspace, &self.system_prompt, sink)
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                self.status.fail(e.to_string()).await;
                return Err(e.into());
            }
        };
        *self.conversation.lock().await = Some(conversation);

        self.status.set(SessionStatus::Running).await;
        Ok(())
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

        let tx = self.ensure_worker().await?;
        tx.send(text.to_string())
            .map_err(|_| SessionError::Backend("worker has stopped".to_string()))?;
        Ok(SendReceipt::new())
    }

    async fn status(&self) -> BackendStatus {
        self.status.get().await
    }

    async fn events(&self) -> Vec<AgentEvent> {
        self.sink.snapshot().await
    }

    async fn pause(&self) -> bool {
        // In-process execution has nothing to suspend.
        false
    }

    async fn resume(&self) -> bool {
        false
    }

    async fn cleanup(&self) -> SessionResult<()> {
        self.cancel.cancel();
        // Drop the sender so the worker's queue closes.
        self.tx.lock().await.take();
        if let Some(handle) = self.worker.lock().await.take()
            && tokio::time::timeout(self.join_timeout, handle).await.is_err()
        {
            warn!("Local worker for {} did not stop in time", self.key);
        }
        Ok(())
    }
}
