//! Command handlers: the administrative surface plus the daemon.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use rota_config::RotaConfig;
use rota_heartbeat::HeartbeatMonitor;
use rota_notify::{LogSink, WebhookSink};
use rota_runner::ProcessRunner;
use rota_sched::{FileCheckpointStore, RecoveryManager, Scheduler, TaskExecutor};
use rota_store::TaskStore;
use rota_types::{NewTask, NotificationSink, ScheduledTask, TaskKind, TaskPatch};

fn open_store(config: &RotaConfig) -> anyhow::Result<Arc<TaskStore>> {
    let path = config.db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(TaskStore::open(&path)?))
}

fn make_sink(config: &RotaConfig) -> Arc<dyn NotificationSink> {
    match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(LogSink),
    }
}

struct Stack {
    store: Arc<TaskStore>,
    scheduler: Arc<Scheduler>,
    heartbeat: Arc<HeartbeatMonitor>,
    sink: Arc<dyn NotificationSink>,
    config: RotaConfig,
}

fn build_stack() -> anyhow::Result<Stack> {
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    let sink = make_sink(&config);
    let runner = Arc::new(ProcessRunner::new());
    let heartbeat = Arc::new(HeartbeatMonitor::new(
        runner.clone(),
        Duration::from_secs(config.heartbeat.warning_threshold_secs),
    ));
    let executor = Arc::new(TaskExecutor::new(
        store.clone(),
        runner,
        sink.clone(),
        heartbeat.clone(),
        Duration::from_secs(config.scheduler.shell_timeout_secs),
    ));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        executor,
        Duration::from_secs(config.scheduler.tick_secs),
    ));
    Ok(Stack {
        store,
        scheduler,
        heartbeat,
        sink,
        config,
    })
}

/// Recovery first, then the fire and heartbeat loops, until ctrl-c.
pub async fn run_daemon() -> anyhow::Result<()> {
    let stack = build_stack()?;

    let checkpoints = Arc::new(FileCheckpointStore::new(stack.config.checkpoint_dir()?));
    let recovery = RecoveryManager::new(stack.store.clone(), checkpoints);
    let summary = recovery.run().await?;
    info!("\n{}", summary.render());
    if summary.running_tasks_found > 0 {
        // Best-effort: the boot report is advisory.
        let _ = stack.sink.send(&summary.render()).await;
    }

    stack
        .heartbeat
        .clone()
        .start(Duration::from_secs(stack.config.heartbeat.interval_secs))
        .await;
    stack.scheduler.clone().start().await;

    info!("rota daemon up; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("signal handling failed")?;

    info!("shutting down");
    stack.scheduler.stop().await;
    stack.heartbeat.stop().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn add_task(
    name: String,
    schedule: String,
    kind: String,
    script_path: Option<String>,
    subagent_name: Option<String>,
    subagent_instructions: Option<String>,
    subagent_task: Option<String>,
    notification_enabled: bool,
) -> anyhow::Result<()> {
    let kind = TaskKind::from_str(&kind).map_err(|e| anyhow::anyhow!(e))?;
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;

    let task = store
        .create(NewTask {
            name,
            schedule,
            kind,
            script_path,
            subagent_name,
            subagent_instructions,
            subagent_task,
            notification_enabled,
        })
        .await?;

    println!(
        "[OK] '{}' scheduled (running every {})",
        task.name, task.schedule
    );
    Ok(())
}

pub async fn list_tasks() -> anyhow::Result<()> {
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    let tasks = store.list().await?;

    if tasks.is_empty() {
        println!("No scheduled tasks found.");
        return Ok(());
    }

    println!("[SCH] Scheduled Tasks\n");
    for task in tasks {
        println!("ID: {} | {}", task.id, task.name);
        println!("  Kind: {}", task.kind);
        println!("  Schedule: {}", task.schedule);
        println!("  State: {}", task.state.as_str());
        println!(
            "  Notifications: {}",
            if task.notification_enabled { "on" } else { "off" }
        );
        if let Some(last_run) = task.last_run {
            let status = task
                .last_status
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            println!(
                "  Last Run: {} ({status})",
                last_run.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
    }
    Ok(())
}

pub async fn get_task(name: String) -> anyhow::Result<()> {
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    let task = store
        .get(&name)
        .await?
        .with_context(|| format!("no task named {name:?}"))?;

    print_task(&task);
    Ok(())
}

fn print_task(task: &ScheduledTask) {
    println!("Task: {}\n", task.name);
    println!("ID: {}", task.id);
    println!("Kind: {}", task.kind);
    println!("Schedule: {}", task.schedule);
    println!("State: {}", task.state.as_str());
    println!(
        "Notifications: {}",
        if task.notification_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    if let Some(script_path) = &task.script_path {
        println!("Script: {script_path}");
    }
    if let Some(subagent_name) = &task.subagent_name {
        println!("Subagent Name: {subagent_name}");
    }
    if let Some(instructions) = &task.subagent_instructions {
        println!("Instructions: {instructions}");
    }
    if let Some(subagent_task) = &task.subagent_task {
        println!("Task: {subagent_task}");
    }
    if let Some(last_run) = task.last_run {
        println!("Last Run: {}", last_run.format("%Y-%m-%d %H:%M:%S"));
        if let Some(status) = task.last_status {
            println!("Last Status: {}", status.as_str());
        }
    }
    if let Some(output) = &task.last_output {
        let snippet: String = output.chars().take(500).collect();
        println!("Last Output:\n{snippet}");
    }
}

pub async fn update_task(name: String, patch: TaskPatch) -> anyhow::Result<()> {
    if patch.is_empty() {
        anyhow::bail!("nothing to update; pass at least one field");
    }
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    let task = store.update(&name, patch).await?;
    println!("[OK] Task '{}' updated", task.name);
    Ok(())
}

pub async fn remove_task(name: String) -> anyhow::Result<()> {
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    if store.remove(&name).await? {
        println!("[OK] Task '{name}' removed");
    } else {
        println!("No task named '{name}'");
    }
    Ok(())
}

pub async fn pause_task(name: String) -> anyhow::Result<()> {
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    store.pause(&name).await?;
    println!("[PAUSED] Task '{name}'");
    Ok(())
}

pub async fn resume_task(name: String) -> anyhow::Result<()> {
    let config = rota_config::load_config()?;
    let store = open_store(&config)?;
    store.resume(&name).await?;
    println!("[RESUMED] Task '{name}'");
    Ok(())
}

pub async fn run_now(name: String) -> anyhow::Result<()> {
    let stack = build_stack()?;
    stack.scheduler.run_now(&name).await?;
    println!("[RUN] Task '{name}' triggered");

    // One-shot invocation: give the spawned execution a moment to record
    // its outcome before the process exits.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(task) = stack.store.get(&name).await? {
            if task.last_status != Some(rota_types::RunStatus::Running) {
                if let Some(status) = task.last_status {
                    println!("Finished: {}", status.as_str());
                }
                break;
            }
        }
    }
    Ok(())
}

pub async fn status() -> anyhow::Result<()> {
    let stack = build_stack()?;
    println!("{}", stack.scheduler.status().await?);
    println!();
    println!("{}", stack.heartbeat.report().await);
    Ok(())
}
