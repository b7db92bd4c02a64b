//! Startup recovery — reconciles tasks stranded mid-execution by a crash.
//!
//! Runs exactly once per process lifetime, before the scheduler starts. A
//! task the store still records as `running` at that point is, by
//! definition, an orphan: no process-local record of a live execution
//! survives a restart.

use std::sync::Arc;

use tracing::{info, warn};

use rota_store::TaskStore;
use rota_types::{CheckpointStore, RunStatus, ScheduledTask};

/// What the recovery pass found and did, for the boot-time report.
#[derive(Debug, Default, Clone)]
pub struct RecoverySummary {
    pub running_tasks_found: usize,
    /// Tasks parked because their own reconciliation failed; a paused task
    /// cannot refire into a half-reconciled state.
    pub tasks_paused: usize,
    pub checkpoints_restored: usize,
    pub failures: Vec<String>,
}

impl RecoverySummary {
    /// Render the boot-time report.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "SYSTEM RECOVERY REPORT".to_string(),
            "=".repeat(30),
        ];

        if self.running_tasks_found == 0 {
            lines.push("No interrupted tasks found.".to_string());
        } else {
            lines.push(format!(
                "Interrupted tasks found: {}",
                self.running_tasks_found
            ));
            lines.push(format!("Checkpoints restored: {}", self.checkpoints_restored));
            lines.push(format!("Tasks paused: {}", self.tasks_paused));
        }

        if !self.failures.is_empty() {
            lines.push(String::new());
            lines.push("RECOVERY ERRORS:".to_string());
            for failure in &self.failures {
                lines.push(format!("  - {failure}"));
            }
        }

        lines.push(String::new());
        lines.push("System is now operational.".to_string());
        lines.join("\n")
    }
}

pub struct RecoveryManager {
    store: Arc<TaskStore>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl RecoveryManager {
    pub fn new(store: Arc<TaskStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { store, checkpoints }
    }

    /// Scan for orphaned executions and reconcile each one. A failure on
    /// one task is recorded and does not abort recovery of the rest; only
    /// store unavailability for the initial scan is fatal.
    pub async fn run(&self) -> rota_store::Result<RecoverySummary> {
        let orphans = self.store.list_running().await?;

        let mut summary = RecoverySummary {
            running_tasks_found: orphans.len(),
            ..Default::default()
        };

        for task in orphans {
            match self.reconcile(&task).await {
                Ok(restored) => {
                    if restored {
                        summary.checkpoints_restored += 1;
                    }
                }
                Err(e) => {
                    warn!(task = %task.name, "Recovery failed: {e}");
                    summary.failures.push(format!("{}: {e}", task.name));
                    if self.store.pause(&task.name).await.is_ok() {
                        summary.tasks_paused += 1;
                    }
                }
            }
        }

        info!(
            found = summary.running_tasks_found,
            restored = summary.checkpoints_restored,
            paused = summary.tasks_paused,
            "Recovery complete"
        );
        Ok(summary)
    }

    /// Close out one orphan: record the interruption, then restore its
    /// checkpoint if one exists. The task stays active and eligible for
    /// its next natural fire.
    async fn reconcile(&self, task: &ScheduledTask) -> anyhow::Result<bool> {
        self.store
            .end_run(task.id, RunStatus::Failure, "interrupted by restart")
            .await?;
        info!(task = %task.name, "Marked orphaned execution as interrupted");

        if self.checkpoints.exists(task.id).await {
            let checkpoint = self.checkpoints.load(task.id).await?;
            if let Some(checkpoint) = checkpoint {
                info!(
                    task = %task.name,
                    bytes = checkpoint.len(),
                    "Restored checkpoint"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use rota_types::{NewTask, TaskKind, TaskState};

    struct NoCheckpoints;

    #[async_trait]
    impl CheckpointStore for NoCheckpoints {
        async fn exists(&self, _task_id: i64) -> bool {
            false
        }
        async fn load(&self, _task_id: i64) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    /// Claims a checkpoint exists but fails to load it.
    struct BrokenCheckpoints;

    #[async_trait]
    impl CheckpointStore for BrokenCheckpoints {
        async fn exists(&self, _task_id: i64) -> bool {
            true
        }
        async fn load(&self, _task_id: i64) -> anyhow::Result<Option<String>> {
            anyhow::bail!("checkpoint file unreadable")
        }
    }

    struct OneCheckpoint {
        task_id: i64,
    }

    #[async_trait]
    impl CheckpointStore for OneCheckpoint {
        async fn exists(&self, task_id: i64) -> bool {
            task_id == self.task_id
        }
        async fn load(&self, task_id: i64) -> anyhow::Result<Option<String>> {
            Ok((task_id == self.task_id).then(|| "{\"step\":7}".to_string()))
        }
    }

    fn silent(name: &str) -> NewTask {
        NewTask {
            name: name.into(),
            schedule: "* * * * *".into(),
            kind: TaskKind::Silent,
            script_path: None,
            subagent_name: None,
            subagent_instructions: None,
            subagent_task: None,
            notification_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_orphan_marked_interrupted_and_left_active() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let task = store.create(silent("t")).await.unwrap();
        assert!(store.begin_run(task.id).await.unwrap());

        let manager = RecoveryManager::new(store.clone(), Arc::new(NoCheckpoints));
        let summary = manager.run().await.unwrap();

        assert_eq!(summary.running_tasks_found, 1);
        assert_eq!(summary.checkpoints_restored, 0);
        assert_eq!(summary.tasks_paused, 0);
        assert!(summary.failures.is_empty());

        let after = store.get("t").await.unwrap().unwrap();
        assert_ne!(after.last_status, Some(RunStatus::Running));
        assert_eq!(after.last_status, Some(RunStatus::Failure));
        assert_eq!(after.last_output.as_deref(), Some("interrupted by restart"));
        // Still eligible for its next natural fire.
        assert_eq!(after.state, TaskState::Active);
    }

    #[tokio::test]
    async fn test_clean_store_finds_nothing() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        store.create(silent("t")).await.unwrap();

        let manager = RecoveryManager::new(store.clone(), Arc::new(NoCheckpoints));
        let summary = manager.run().await.unwrap();
        assert_eq!(summary.running_tasks_found, 0);
        assert!(summary.render().contains("No interrupted tasks found."));
    }

    #[tokio::test]
    async fn test_checkpoint_restored() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let task = store.create(silent("t")).await.unwrap();
        assert!(store.begin_run(task.id).await.unwrap());

        let manager =
            RecoveryManager::new(store.clone(), Arc::new(OneCheckpoint { task_id: task.id }));
        let summary = manager.run().await.unwrap();
        assert_eq!(summary.checkpoints_restored, 1);
        assert!(summary.failures.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_recovery() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let a = store.create(silent("a")).await.unwrap();
        let b = store.create(silent("b")).await.unwrap();
        assert!(store.begin_run(a.id).await.unwrap());
        assert!(store.begin_run(b.id).await.unwrap());

        let manager = RecoveryManager::new(store.clone(), Arc::new(BrokenCheckpoints));
        let summary = manager.run().await.unwrap();

        assert_eq!(summary.running_tasks_found, 2);
        // Both reconciliations failed at checkpoint load; both recorded,
        // both parked, neither aborted the other.
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.tasks_paused, 2);
        for name in ["a", "b"] {
            let after = store.get(name).await.unwrap().unwrap();
            assert_ne!(after.last_status, Some(RunStatus::Running));
            assert_eq!(after.state, TaskState::Paused);
        }
    }

    #[tokio::test]
    async fn test_render_report_shape() {
        let summary = RecoverySummary {
            running_tasks_found: 2,
            tasks_paused: 1,
            checkpoints_restored: 1,
            failures: vec!["b: checkpoint file unreadable".into()],
        };
        let report = summary.render();
        assert!(report.starts_with("SYSTEM RECOVERY REPORT"));
        assert!(report.contains("Interrupted tasks found: 2"));
        assert!(report.contains("Checkpoints restored: 1"));
        assert!(report.contains("Tasks paused: 1"));
        assert!(report.contains("b: checkpoint file unreadable"));
        assert!(report.ends_with("System is now operational."));
    }
}
