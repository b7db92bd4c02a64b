//! rota-heartbeat: liveness monitoring for delegated work.
//!
//! The monitor owns an in-memory registry of heartbeat records, one per
//! tracked subject. A background tick polls each running subject through
//! the [`SubagentRunner`], escalates long runners to a warning exactly
//! once, and pushes a rendered report to every registered consumer.
//! Nothing here is persisted; the registry dies with the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rota_types::{SubagentRunner, SubagentStatus};

/// Default tick interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Default elapsed-time threshold before a running subject is flagged.
pub const DEFAULT_WARNING_THRESHOLD: Duration = Duration::from_secs(120);

/// In-memory record of one monitored subject.
#[derive(Debug, Clone)]
pub struct HeartbeatRecord {
    pub subject_id: String,
    pub display_name: String,
    pub status: SubagentStatus,
    pub start_time: DateTime<Utc>,
    pub last_check: DateTime<Utc>,
    /// Monotonic: once set, never cleared for this record.
    pub warning_issued: bool,
    /// Append-only status history.
    pub update_log: Vec<String>,
    /// Set once the terminal status has been rendered into a report; the
    /// record survives one further report cycle, then goes.
    evict_after_report: bool,
}

impl HeartbeatRecord {
    fn new(subject_id: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            subject_id,
            display_name,
            status: SubagentStatus::Running,
            start_time: now,
            last_check: now,
            warning_issued: false,
            update_log: Vec::new(),
            evict_after_report: false,
        }
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A subscriber that receives the rendered report after every tick.
#[async_trait]
pub trait ReportConsumer: Send + Sync {
    async fn consume(&self, report: &str);
}

struct LoopState {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Background monitor for active subagent work.
pub struct HeartbeatMonitor {
    runner: Arc<dyn SubagentRunner>,
    warning_threshold: Duration,
    records: RwLock<HashMap<String, HeartbeatRecord>>,
    consumers: RwLock<Vec<Arc<dyn ReportConsumer>>>,
    loop_state: Mutex<LoopState>,
}

impl HeartbeatMonitor {
    pub fn new(runner: Arc<dyn SubagentRunner>, warning_threshold: Duration) -> Self {
        Self {
            runner,
            warning_threshold,
            records: RwLock::new(HashMap::new()),
            consumers: RwLock::new(Vec::new()),
            loop_state: Mutex::new(LoopState {
                cancel: None,
                handle: None,
            }),
        }
    }

    /// Track a subject. Re-registering a live subject only refreshes its
    /// display name; a terminal record is replaced outright.
    pub async fn register(&self, subject_id: &str, display_name: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(subject_id) {
            if !record.status.is_terminal() {
                record.display_name = display_name.to_string();
                return;
            }
        }
        records.insert(
            subject_id.to_string(),
            HeartbeatRecord::new(subject_id.to_string(), display_name.to_string()),
        );
        info!(subject = %subject_id, name = %display_name, "Heartbeat: registered");
    }

    /// Stop tracking a subject regardless of its status.
    pub async fn unregister(&self, subject_id: &str) -> bool {
        let removed = self.records.write().await.remove(subject_id).is_some();
        if removed {
            info!(subject = %subject_id, "Heartbeat: unregistered");
        }
        removed
    }

    /// Subscribe a report consumer. Subscriptions are independent; one
    /// consumer cannot observe or disturb another.
    pub async fn register_callback(&self, consumer: Arc<dyn ReportConsumer>) {
        self.consumers.write().await.push(consumer);
    }

    /// One monitoring cycle: poll every running subject, apply warning
    /// escalation, report to consumers, and evict records whose terminal
    /// status has already been reported once.
    pub async fn poll_tick(&self) {
        let running_ids: Vec<String> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|r| !r.status.is_terminal())
                .map(|r| r.subject_id.clone())
                .collect()
        };

        // Each subject's query proceeds on its own; a slow or failing poll
        // degrades only that record's freshness.
        join_all(
            running_ids
                .iter()
                .map(|id| self.check_subject(id.as_str())),
        )
        .await;

        let report = self.report().await;
        let consumers = self.consumers.read().await.clone();
        for consumer in consumers {
            consumer.consume(&report).await;
        }

        // Terminal records get exactly one report cycle after the one that
        // first carried their final status.
        let mut records = self.records.write().await;
        records.retain(|_, r| !r.evict_after_report);
        for record in records.values_mut() {
            if record.status.is_terminal() {
                record.evict_after_report = true;
            }
        }
    }

    async fn check_subject(&self, subject_id: &str) {
        let polled = self.runner.poll(subject_id).await;
        let now = Utc::now();

        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(subject_id) else {
            return; // unregistered mid-poll
        };
        record.last_check = now;

        match polled {
            Ok(status) => {
                record.status = status;
                record
                    .update_log
                    .push(format!("[{}] status: {}", now.format("%H:%M:%S"), status.as_str()));
            }
            Err(e) => {
                // Unknown, not failed: leave the status as it was.
                record
                    .update_log
                    .push(format!("[{}] status unknown: {e}", now.format("%H:%M:%S")));
            }
        }

        // Only elapsed wall-clock time escalates, and only once per record.
        if !record.warning_issued
            && !record.status.is_terminal()
            && record.elapsed(now) > self.warning_threshold
        {
            record.warning_issued = true;
            let line = format!(
                "[WARN] {} running for {}s without completion",
                record.display_name,
                record.elapsed(now).as_secs()
            );
            warn!(subject = %subject_id, "{line}");
            record.update_log.push(line);
        }
    }

    /// Render all tracked records, grouped and counted by status. Takes
    /// only the read lock, so it is safe alongside a tick in progress.
    pub async fn report(&self) -> String {
        let records = self.records.read().await;
        let now = Utc::now();

        if records.is_empty() {
            return "Heartbeat: no active subjects to monitor.".to_string();
        }

        let mut by_id: Vec<&HeartbeatRecord> = records.values().collect();
        by_id.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));

        let mut lines = vec![
            "[HB] Heartbeat Report".to_string(),
            now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            String::new(),
        ];

        let (mut running, mut completed, mut failed) = (0usize, 0usize, 0usize);
        for record in &by_id {
            match record.status {
                SubagentStatus::Running => {
                    running += 1;
                    let marker = if record.warning_issued { "[WARN]" } else { "[RUN]" };
                    lines.push(format!(
                        "{marker} {}: running ({}s)",
                        record.display_name,
                        record.elapsed(now).as_secs()
                    ));
                }
                SubagentStatus::Completed => {
                    completed += 1;
                    lines.push(format!("[OK] {}: completed", record.display_name));
                }
                SubagentStatus::Failed => {
                    failed += 1;
                    lines.push(format!("[FAIL] {}: failed", record.display_name));
                }
            }
        }

        lines.push(String::new());
        lines.push(format!(
            "Summary: {running} running, {completed} completed, {failed} failed"
        ));
        lines.join("\n")
    }

    /// Current registry contents (for status surfaces and tests).
    pub async fn snapshot(&self) -> Vec<HeartbeatRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Start the tick loop. A second call while running is a no-op.
    pub async fn start(self: Arc<Self>, interval: Duration) {
        let mut state = self.loop_state.lock().await;
        if state.cancel.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let monitor = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            info!("Heartbeat monitor started (interval: {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        monitor.poll_tick().await;
                    }
                }
            }
            info!("Heartbeat monitor stopped");
        });

        state.cancel = Some(cancel);
        state.handle = Some(handle);
    }

    /// Stop the tick loop. Cancellation is observed between ticks, so an
    /// in-flight tick always runs to completion.
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
}
