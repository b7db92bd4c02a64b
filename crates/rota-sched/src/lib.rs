//! rota-sched: the scheduling core.
//!
//! Three pieces live here: the [`Scheduler`] fire loop, the
//! [`TaskExecutor`] that runs one task instance to completion, and the
//! [`RecoveryManager`] that reconciles state stranded by a crash before
//! the scheduler ever starts.

pub mod checkpoint;
pub mod executor;
pub mod recovery;
pub mod scheduler;

pub use checkpoint::FileCheckpointStore;
pub use executor::TaskExecutor;
pub use recovery::{RecoveryManager, RecoverySummary};
pub use scheduler::Scheduler;

use rota_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("no task named {0:?}")]
    NotFound(String),
    #[error("task {0:?} is already running")]
    AlreadyRunning(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SchedError>;

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use rota_types::{
        CompletionHandler, ExecutionResult, NotificationSink, SubagentRunner, SubagentStatus,
    };

    /// Runner that hands out sequential subject ids and lets a test drive
    /// completion by hand.
    pub struct FakeRunner {
        next_id: AtomicUsize,
        pub spawned: Mutex<Vec<(String, String, String)>>,
        handlers: Mutex<HashMap<String, CompletionHandler>>,
        pub fail_spawn: bool,
    }

    impl FakeRunner {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicUsize::new(1),
                spawned: Mutex::new(Vec::new()),
                handlers: Mutex::new(HashMap::new()),
                fail_spawn: false,
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicUsize::new(1),
                spawned: Mutex::new(Vec::new()),
                handlers: Mutex::new(HashMap::new()),
                fail_spawn: true,
            })
        }

        /// Drive the completion handler installed for a subject.
        pub async fn complete(&self, subject_id: &str, result: ExecutionResult) {
            let handler = self
                .handlers
                .lock()
                .await
                .remove(subject_id)
                .expect("no completion handler installed");
            handler(result).await;
        }
    }

    #[async_trait]
    impl SubagentRunner for FakeRunner {
        async fn spawn(
            &self,
            name: &str,
            instructions: &str,
            task: &str,
        ) -> anyhow::Result<String> {
            if self.fail_spawn {
                anyhow::bail!("runner unavailable");
            }
            let id = format!("subject-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.spawned
                .lock()
                .await
                .push((name.into(), instructions.into(), task.into()));
            Ok(id)
        }

        async fn poll(&self, _subject_id: &str) -> anyhow::Result<SubagentStatus> {
            Ok(SubagentStatus::Running)
        }

        async fn on_complete(&self, subject_id: &str, handler: CompletionHandler) {
            self.handlers
                .lock()
                .await
                .insert(subject_id.to_string(), handler);
        }
    }

    /// Sink that records messages, optionally erroring on every send.
    pub struct RecordingSink {
        pub messages: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, message: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("sink unreachable");
            }
            self.messages.lock().await.push(message.to_string());
            Ok(())
        }
    }
}
