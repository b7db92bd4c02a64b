//! Task execution — runs one task instance to completion and records the
//! outcome.
//!
//! Callers must have already won the store's `begin_run` transition for
//! the task; the executor always closes it out with `end_run` (for
//! subagent tasks, via the runner's completion callback).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use rota_heartbeat::HeartbeatMonitor;
use rota_store::TaskStore;
use rota_types::{ExecutionResult, NotificationSink, RunStatus, ScheduledTask, SubagentRunner, TaskKind};

/// Default bound on shell script execution.
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// How much task output a notification message carries.
const NOTIFY_SNIPPET_CHARS: usize = 1000;

pub struct TaskExecutor {
    store: Arc<TaskStore>,
    runner: Arc<dyn SubagentRunner>,
    sink: Arc<dyn NotificationSink>,
    heartbeat: Arc<HeartbeatMonitor>,
    shell_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<TaskStore>,
        runner: Arc<dyn SubagentRunner>,
        sink: Arc<dyn NotificationSink>,
        heartbeat: Arc<HeartbeatMonitor>,
        shell_timeout: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            sink,
            heartbeat,
            shell_timeout,
        }
    }

    /// Run a task whose `begin_run` transition has been won.
    pub async fn execute(&self, task: ScheduledTask) {
        match task.kind {
            TaskKind::Silent => {
                info!(task = %task.name, "Executing silent task");
                self.finish(&task, ExecutionResult::success("silent task completed"))
                    .await;
            }
            TaskKind::ShellScript => {
                let result = self.run_shell(&task).await;
                self.finish(&task, result).await;
            }
            TaskKind::SubagentRecall => {
                self.dispatch_subagent(task).await;
            }
        }
    }

    async fn run_shell(&self, task: &ScheduledTask) -> ExecutionResult {
        let Some(script_path) = task.script_path.as_deref() else {
            return ExecutionResult::failure("no script_path configured");
        };
        info!(task = %task.name, script = %script_path, "Executing shell script");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(script_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.shell_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::failure(format!("failed to spawn script: {e}"));
            }
            Err(_) => {
                return ExecutionResult::failure(format!(
                    "script timed out after {}s",
                    self.shell_timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            ExecutionResult::success(stdout.into_owned())
        } else {
            let code = output.status.code().unwrap_or(-1);
            ExecutionResult::failure(format!("Error (code {code}): {stderr}\n{stdout}"))
        }
    }

    /// Fire-and-forget: spawn the subagent, enroll it with the heartbeat
    /// monitor, and leave `end_run` to the completion callback. The task
    /// stays `running` in the store until that callback lands.
    async fn dispatch_subagent(&self, task: ScheduledTask) {
        let name = task
            .subagent_name
            .clone()
            .unwrap_or_else(|| format!("scheduled_{}", task.id));
        let instructions = task
            .subagent_instructions
            .clone()
            .unwrap_or_else(|| "You are a scheduled task executor.".to_string());
        let Some(prompt) = task.subagent_task.clone() else {
            self.finish(&task, ExecutionResult::failure("no subagent_task configured"))
                .await;
            return;
        };

        info!(task = %task.name, subagent = %name, "Spawning subagent");
        let subject_id = match self.runner.spawn(&name, &instructions, &prompt).await {
            Ok(id) => id,
            Err(e) => {
                self.finish(&task, ExecutionResult::failure(format!("spawn failed: {e}")))
                    .await;
                return;
            }
        };

        self.heartbeat.register(&subject_id, &name).await;

        let store = self.store.clone();
        let sink = self.sink.clone();
        let task_id = task.id;
        let task_name = task.name.clone();
        let notify = task.notification_enabled;
        self.runner
            .on_complete(
                &subject_id,
                Box::new(move |result: ExecutionResult| {
                    Box::pin(async move {
                        if let Err(e) = store.end_run(task_id, result.status, &result.output).await
                        {
                            error!(task = %task_name, "Failed to record subagent completion: {e}");
                            return;
                        }
                        info!(
                            task = %task_name,
                            status = result.status.as_str(),
                            "Subagent task finished"
                        );
                        if notify {
                            let message = completion_message(&task_name, &result);
                            if let Err(e) = sink.send(&message).await {
                                warn!(task = %task_name, "Notification sink error: {e}");
                            }
                        }
                    })
                }),
            )
            .await;

        if task.notification_enabled {
            self.notify(&format!(
                "[RUN] Subagent '{name}' triggered by scheduled task '{}'",
                task.name
            ))
            .await;
        }
    }

    /// Record a terminal outcome and fan out the notification. Sink errors
    /// never mask the recorded status.
    async fn finish(&self, task: &ScheduledTask, result: ExecutionResult) {
        if let Err(e) = self.store.end_run(task.id, result.status, &result.output).await {
            error!(task = %task.name, "Failed to record run outcome: {e}");
        }
        info!(task = %task.name, status = result.status.as_str(), "Task finished");

        if task.notification_enabled {
            self.notify(&completion_message(&task.name, &result)).await;
        }
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.sink.send(message).await {
            warn!("Notification sink error: {e}");
        }
    }
}

fn completion_message(task_name: &str, result: &ExecutionResult) -> String {
    match result.status {
        RunStatus::Failure => format!(
            "[FAIL] Scheduled task '{task_name}' failed.\n{}",
            snippet(&result.output, NOTIFY_SNIPPET_CHARS)
        ),
        _ => format!("[OK] Scheduled task '{task_name}' completed."),
    }
}

fn snippet(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
