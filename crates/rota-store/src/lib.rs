//! rota-store: SQLite-backed persistence for scheduled tasks.
//!
//! The store is the single source of truth for task definitions and their
//! last-known execution result. Every mutation completes its SQLite write
//! before the async call returns, which is what makes the startup recovery
//! scan meaningful after a crash.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;

use rota_cron::CronExpr;
use rota_types::{NewTask, RunStatus, ScheduledTask, TaskKind, TaskPatch, TaskState};

/// Stored output is capped so one chatty script cannot bloat the table.
const MAX_OUTPUT_CHARS: usize = 5000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("task named {0:?} already exists")]
    DuplicateName(String),
    #[error("no task named {0:?}")]
    NotFound(String),
    #[error(transparent)]
    InvalidCron(#[from] rota_cron::CronError),
    #[error("invalid task: {0}")]
    InvalidTask(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    schedule TEXT NOT NULL,
    kind TEXT NOT NULL,
    script_path TEXT,
    subagent_name TEXT,
    subagent_instructions TEXT,
    subagent_task TEXT,
    state TEXT NOT NULL DEFAULT 'active',
    notification_enabled INTEGER NOT NULL DEFAULT 1,
    last_run TEXT,
    last_status TEXT,
    last_output TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

const TASK_COLUMNS: &str = "id, name, schedule, kind, script_path, subagent_name, \
     subagent_instructions, subagent_task, state, notification_enabled, \
     last_run, last_status, last_output, created_at, updated_at";

/// SQLite-backed store for [`ScheduledTask`] rows.
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Writes must reach stable storage before any call acknowledges.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Task store opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ─── CRUD ───────────────────────────────────────────────

    /// Create a task. The cron expression and kind payload are validated
    /// before anything is written; duplicate names are rejected.
    pub async fn create(&self, new: NewTask) -> Result<ScheduledTask> {
        CronExpr::validate(&new.schedule)?;
        validate_payload(&new)?;

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM scheduled_tasks WHERE name = ?1",
                    rusqlite::params![new.name],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::DuplicateName(new.name));
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO scheduled_tasks
                    (name, schedule, kind, script_path, subagent_name,
                     subagent_instructions, subagent_task, state,
                     notification_enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?9, ?9)",
                rusqlite::params![
                    new.name,
                    new.schedule,
                    new.kind.as_str(),
                    new.script_path,
                    new.subagent_name,
                    new.subagent_instructions,
                    new.subagent_task,
                    new.notification_enabled as i64,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();

            tracing::info!(task = %new.name, id, "Created scheduled task");
            fetch_by_id(&conn, id)?.ok_or(StoreError::NotFound(new.name))
        })
        .await?
    }

    /// Get a task by name.
    pub async fn get(&self, name: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            fetch_by_name(&conn, &name)
        })
        .await?
    }

    /// Get a task by id.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            fetch_by_id(&conn, id)
        })
        .await?
    }

    /// List all tasks, ordered by id.
    pub async fn list(&self) -> Result<Vec<ScheduledTask>> {
        self.select_where("1=1").await
    }

    /// List tasks eligible for scheduled firing.
    pub async fn list_active(&self) -> Result<Vec<ScheduledTask>> {
        self.select_where("state = 'active'").await
    }

    /// List tasks the store believes are mid-execution. After a restart
    /// these are, by definition, orphans.
    pub async fn list_running(&self) -> Result<Vec<ScheduledTask>> {
        self.select_where("last_status = 'running'").await
    }

    async fn select_where(&self, clause: &'static str) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let sql =
                format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE {clause} ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    /// Apply a partial update. A new cron expression is validated before it
    /// replaces the stored one.
    pub async fn update(&self, name: &str, patch: TaskPatch) -> Result<ScheduledTask> {
        if let Some(schedule) = &patch.schedule {
            CronExpr::validate(schedule)?;
        }

        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let task = fetch_by_name(&conn, &name)?.ok_or(StoreError::NotFound(name.clone()))?;

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE scheduled_tasks SET
                    schedule = ?1, script_path = ?2, subagent_name = ?3,
                    subagent_instructions = ?4, subagent_task = ?5,
                    notification_enabled = ?6, updated_at = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    patch.schedule.unwrap_or(task.schedule),
                    patch.script_path.or(task.script_path),
                    patch.subagent_name.or(task.subagent_name),
                    patch.subagent_instructions.or(task.subagent_instructions),
                    patch.subagent_task.or(task.subagent_task),
                    patch.notification_enabled.unwrap_or(task.notification_enabled) as i64,
                    now,
                    task.id,
                ],
            )?;

            fetch_by_id(&conn, task.id)?.ok_or(StoreError::NotFound(name))
        })
        .await?
    }

    /// Delete a task. Removing a name that does not exist is a no-op.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn.execute(
                "DELETE FROM scheduled_tasks WHERE name = ?1",
                rusqlite::params![name],
            )?;
            if count > 0 {
                tracing::info!(task = %name, "Removed scheduled task");
            }
            Ok(count > 0)
        })
        .await?
    }

    /// Pause a task. Pausing an already-paused task is a no-op success.
    pub async fn pause(&self, name: &str) -> Result<ScheduledTask> {
        self.set_state(name, TaskState::Paused).await
    }

    /// Resume a paused task. Resuming an active task is a no-op success.
    pub async fn resume(&self, name: &str) -> Result<ScheduledTask> {
        self.set_state(name, TaskState::Active).await
    }

    async fn set_state(&self, name: &str, state: TaskState) -> Result<ScheduledTask> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let task = fetch_by_name(&conn, &name)?.ok_or(StoreError::NotFound(name.clone()))?;
            if task.state == state {
                return Ok(task);
            }
            conn.execute(
                "UPDATE scheduled_tasks SET state = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![state.as_str(), Utc::now().to_rfc3339(), task.id],
            )?;
            fetch_by_id(&conn, task.id)?.ok_or(StoreError::NotFound(name))
        })
        .await?
    }

    // ─── Run Transitions ────────────────────────────────────

    /// Compare-and-set transition into `running`. Returns `false` when an
    /// execution is already in flight, in which case nothing changes.
    pub async fn begin_run(&self, id: i64) -> Result<bool> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let now = Utc::now().to_rfc3339();
            let count = conn.execute(
                "UPDATE scheduled_tasks
                 SET last_status = 'running', last_run = ?1, updated_at = ?1
                 WHERE id = ?2
                   AND (last_status IS NULL OR last_status != 'running')",
                rusqlite::params![now, id],
            )?;
            Ok(count == 1)
        })
        .await?
    }

    /// Unconditionally record a terminal outcome for the last run.
    pub async fn end_run(&self, id: i64, status: RunStatus, output: &str) -> Result<()> {
        let conn = self.conn.clone();
        let output = truncate(output, MAX_OUTPUT_CHARS);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE scheduled_tasks
                 SET last_status = ?1, last_output = ?2, updated_at = ?3
                 WHERE id = ?4",
                rusqlite::params![status.as_str(), output, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await?
    }
}

fn validate_payload(new: &NewTask) -> Result<()> {
    match new.kind {
        TaskKind::ShellScript if new.script_path.is_none() => Err(StoreError::InvalidTask(
            "script_path required for shell_script tasks".into(),
        )),
        TaskKind::SubagentRecall if new.subagent_task.is_none() => Err(StoreError::InvalidTask(
            "subagent_task required for subagent_recall tasks".into(),
        )),
        _ => Ok(()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [output truncated]", &s[..end])
}

fn fetch_by_name(conn: &Connection, name: &str) -> Result<Option<ScheduledTask>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE name = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt
        .query_row(rusqlite::params![name], row_to_task)
        .optional()?)
}

fn fetch_by_id(conn: &Connection, id: i64) -> Result<Option<ScheduledTask>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt
        .query_row(rusqlite::params![id], row_to_task)
        .optional()?)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule: row.get(2)?,
        kind: TaskKind::from_str(&row.get::<_, String>(3)?).unwrap_or(TaskKind::Silent),
        script_path: row.get(4)?,
        subagent_name: row.get(5)?,
        subagent_instructions: row.get(6)?,
        subagent_task: row.get(7)?,
        state: TaskState::from_str(&row.get::<_, String>(8)?).unwrap_or(TaskState::Paused),
        notification_enabled: row.get::<_, i64>(9)? != 0,
        last_run: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| s.parse().ok()),
        last_status: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| RunStatus::from_str(&s).ok()),
        last_output: row.get(12)?,
        created_at: parse_ts(row.get::<_, String>(13)?),
        updated_at: parse_ts(row.get::<_, String>(14)?),
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    s.parse().unwrap_or_else(|_| Utc::now())
}
