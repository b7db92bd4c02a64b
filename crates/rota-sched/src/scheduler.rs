//! The fire loop — decides when active tasks are due and dispatches them.
//!
//! Due times are re-derived from the stored cron expression on every
//! cycle, so schedule edits and pause/resume take effect on the next
//! evaluation without a restart. The due window opens at process start:
//! fires missed while the process was down are never backfilled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rota_cron::CronExpr;
use rota_store::TaskStore;
use rota_types::ScheduledTask;

use crate::executor::TaskExecutor;
use crate::{Result, SchedError};

/// Default evaluation interval. Cron resolution is one minute, so anything
/// well under that keeps fires close to their boundary.
pub const DEFAULT_TICK: Duration = Duration::from_secs(15);

struct LoopState {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    store: Arc<TaskStore>,
    executor: Arc<TaskExecutor>,
    tick: Duration,
    loop_state: Mutex<LoopState>,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, executor: Arc<TaskExecutor>, tick: Duration) -> Self {
        Self {
            store,
            executor,
            tick,
            loop_state: Mutex::new(LoopState {
                cancel: None,
                handle: None,
            }),
        }
    }

    /// Start the fire loop. A second call while running is a no-op.
    pub async fn start(self: Arc<Self>) {
        let mut state = self.loop_state.lock().await;
        if state.cancel.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(token).await;
        });

        state.cancel = Some(cancel);
        state.handle = Some(handle);
    }

    /// Stop the fire loop. Executions already dispatched keep running.
    pub async fn stop(&self) {
        let (cancel, handle) = {
            let mut state = self.loop_state.lock().await;
            (state.cancel.take(), state.handle.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("Scheduler started (tick: {}s)", self.tick.as_secs());
        // Opening the window at startup is what makes downtime fires lapse.
        let mut window_start = Utc::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }

            let now = Utc::now();
            if let Err(e) = self.evaluate_window(window_start, now).await {
                // Nothing durable can be decided without the store.
                error!("Scheduler stopping: task store unavailable: {e}");
                break;
            }
            window_start = now;
        }
        info!("Scheduler stopped");
    }

    /// Dispatch every active task with a cron tick inside `(after, now]`.
    pub(crate) async fn evaluate_window(
        &self,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> rota_store::Result<()> {
        let tasks = self.store.list_active().await?;

        for task in tasks {
            let expr = match CronExpr::parse(&task.schedule) {
                Ok(expr) => expr,
                // Stored expressions were validated at creation; treat a bad
                // one as data corruption and keep the loop alive.
                Err(e) => {
                    warn!(task = %task.name, "Skipping task with unparseable schedule: {e}");
                    continue;
                }
            };

            let due = expr.next_fire(after).is_some_and(|fire| fire <= now);
            if due {
                self.dispatch(task).await?;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, task: ScheduledTask) -> rota_store::Result<()> {
        if !self.store.begin_run(task.id).await? {
            // Another execution is in flight; this cycle is skipped, not
            // queued or retried.
            info!(task = %task.name, "Skipping fire: execution already in flight");
            return Ok(());
        }

        info!(task = %task.name, schedule = %task.schedule, "Dispatching scheduled task");
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.execute(task).await;
        });
        Ok(())
    }

    /// Execute a task immediately, bypassing its schedule. Rejected with
    /// [`SchedError::AlreadyRunning`] when an execution is in flight; the
    /// running execution is unaffected.
    pub async fn run_now(&self, name: &str) -> Result<()> {
        let task = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| SchedError::NotFound(name.to_string()))?;

        if !self.store.begin_run(task.id).await? {
            return Err(SchedError::AlreadyRunning(name.to_string()));
        }

        info!(task = %task.name, "Manual trigger");
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.execute(task).await;
        });
        Ok(())
    }

    /// Human-readable runtime status: loop state, task counts, and each
    /// task's next fire time.
    pub async fn status(&self) -> Result<String> {
        let running = self.loop_state.lock().await.cancel.is_some();
        let tasks = self.store.list().await?;
        let now = Utc::now();

        let active = tasks
            .iter()
            .filter(|t| t.state == rota_types::TaskState::Active)
            .count();

        let mut lines = vec![
            format!("Scheduler: {}", if running { "Running" } else { "Stopped" }),
            format!(
                "Tasks: {} total, {} active, {} paused",
                tasks.len(),
                active,
                tasks.len() - active
            ),
        ];

        if !tasks.is_empty() {
            lines.push(String::new());
        }
        for task in &tasks {
            let detail = match task.state {
                rota_types::TaskState::Paused => "paused".to_string(),
                rota_types::TaskState::Active => match CronExpr::parse(&task.schedule) {
                    Ok(expr) => match expr.next_fire(now) {
                        Some(fire) => {
                            format!("next fire at {}", fire.format("%Y-%m-%d %H:%M UTC"))
                        }
                        None => "no upcoming fire".to_string(),
                    },
                    Err(_) => "invalid schedule".to_string(),
                },
            };
            lines.push(format!("  - {} [{}]: {}", task.name, task.schedule, detail));
        }

        Ok(lines.join("\n"))
    }
}
