//! rota-types: shared data model and collaborator interfaces.
//!
//! Everything the scheduler, store, executor, and heartbeat monitor agree
//! on lives here: the persisted task schema, run outcomes, and the traits
//! for the external collaborators (subagent runner, notification sink,
//! checkpoint store).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Task Model ────────────────────

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the script at `script_path` as an external process.
    ShellScript,
    /// Delegate to the subagent runner; completion arrives asynchronously.
    SubagentRecall,
    /// No-op that keeps a schedule slot alive.
    Silent,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ShellScript => "shell_script",
            TaskKind::SubagentRecall => "subagent_recall",
            TaskKind::Silent => "silent",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell_script" => Ok(TaskKind::ShellScript),
            "subagent_recall" => Ok(TaskKind::SubagentRecall),
            "silent" => Ok(TaskKind::Silent),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a task is eligible for scheduled firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Active,
    Paused,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Active => "active",
            TaskState::Paused => "paused",
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskState::Active),
            "paused" => Ok(TaskState::Paused),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// Outcome of a task execution, as recorded in `last_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Running,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Running => "running",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "running" => Ok(RunStatus::Running),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted scheduled task. One row in the `scheduled_tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Row id, assigned at creation, immutable.
    pub id: i64,
    /// Globally unique, user-chosen name.
    pub name: String,
    /// Five-field cron expression. Validated before it is ever stored.
    pub schedule: String,
    pub kind: TaskKind,
    /// Shell script path (for `shell_script` tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    /// Display name for the spawned subagent (for `subagent_recall`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_name: Option<String>,
    /// System instructions for the subagent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_instructions: Option<String>,
    /// Task prompt for the subagent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_task: Option<String>,
    pub state: TaskState,
    pub notification_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Whether the store currently records an execution in flight.
    pub fn is_running(&self) -> bool {
        self.last_status == Some(RunStatus::Running)
    }
}

/// Fields for creating a task. `id`, timestamps, and run history are
/// store-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub schedule: String,
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_task: Option<String>,
    #[serde(default = "default_true")]
    pub notification_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Partial update for an existing task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_enabled: Option<bool>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_none()
            && self.script_path.is_none()
            && self.subagent_name.is_none()
            && self.subagent_instructions.is_none()
            && self.subagent_task.is_none()
            && self.notification_enabled.is_none()
    }
}

/// Terminal-or-not outcome of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub output: String,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failure,
            output: output.into(),
        }
    }
}

// ──────────────────── Subagent Types ────────────────────

/// Liveness state of a delegated unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

impl SubagentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubagentStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubagentStatus::Running => "running",
            SubagentStatus::Completed => "completed",
            SubagentStatus::Failed => "failed",
        }
    }
}

// ──────────────────── Collaborator Interfaces ────────────────────

/// Handler invoked once when a delegated unit of work finishes.
pub type CompletionHandler =
    Box<dyn FnOnce(ExecutionResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Spawns and tracks delegated work whose completion is not awaited by the
/// dispatcher.
#[async_trait]
pub trait SubagentRunner: Send + Sync {
    /// Start a unit of work; returns its subject id.
    async fn spawn(&self, name: &str, instructions: &str, task: &str) -> anyhow::Result<String>;

    /// Query liveness. An error means "unknown", not "failed".
    async fn poll(&self, subject_id: &str) -> anyhow::Result<SubagentStatus>;

    /// Install a completion handler for a subject. The handler is called at
    /// most once, with the final result.
    async fn on_complete(&self, subject_id: &str, handler: CompletionHandler);
}

/// Delivers a human-readable message to whatever the deployment notifies
/// (chat webhook, log, ...). Errors are the caller's to swallow.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// Read-only access to externally persisted resume-state, consulted only
/// during crash recovery.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn exists(&self, task_id: i64) -> bool;
    async fn load(&self, task_id: i64) -> anyhow::Result<Option<String>>;
}
