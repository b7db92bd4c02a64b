mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rota", about = "Persistent cron task scheduler with crash recovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon (recovery, fire loop, heartbeat monitor)
    Run,
    /// Add a scheduled task
    Add {
        /// Unique task name
        #[arg(long)]
        name: String,

        /// Five-field cron expression (e.g. "0 3 * * *")
        #[arg(long)]
        schedule: String,

        /// Task kind: shell_script, subagent_recall, or silent
        #[arg(long)]
        kind: String,

        /// Shell script path (for shell_script tasks)
        #[arg(long)]
        script_path: Option<String>,

        /// Subagent display name (for subagent_recall tasks)
        #[arg(long)]
        subagent_name: Option<String>,

        /// Subagent system instructions
        #[arg(long)]
        subagent_instructions: Option<String>,

        /// Subagent task prompt
        #[arg(long)]
        subagent_task: Option<String>,

        /// Disable completion notifications for this task
        #[arg(long)]
        no_notify: bool,
    },
    /// List all scheduled tasks
    List,
    /// Show one task in detail
    Get { name: String },
    /// Update fields of an existing task
    Update {
        name: String,

        #[arg(long)]
        schedule: Option<String>,

        #[arg(long)]
        script_path: Option<String>,

        #[arg(long)]
        subagent_name: Option<String>,

        #[arg(long)]
        subagent_instructions: Option<String>,

        #[arg(long)]
        subagent_task: Option<String>,

        /// Enable or disable notifications
        #[arg(long)]
        notify: Option<bool>,
    },
    /// Remove a task
    Remove { name: String },
    /// Pause a task (stops scheduled firing, keeps history)
    Pause { name: String },
    /// Resume a paused task
    Resume { name: String },
    /// Trigger a task immediately, bypassing its schedule
    RunNow { name: String },
    /// Show scheduler and task status
    Status,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run => rt.block_on(commands::run_daemon())?,
        Commands::Add {
            name,
            schedule,
            kind,
            script_path,
            subagent_name,
            subagent_instructions,
            subagent_task,
            no_notify,
        } => rt.block_on(commands::add_task(
            name,
            schedule,
            kind,
            script_path,
            subagent_name,
            subagent_instructions,
            subagent_task,
            !no_notify,
        ))?,
        Commands::List => rt.block_on(commands::list_tasks())?,
        Commands::Get { name } => rt.block_on(commands::get_task(name))?,
        Commands::Update {
            name,
            schedule,
            script_path,
            subagent_name,
            subagent_instructions,
            subagent_task,
            notify,
        } => rt.block_on(commands::update_task(
            name,
            rota_types::TaskPatch {
                schedule,
                script_path,
                subagent_name,
                subagent_instructions,
                subagent_task,
                notification_enabled: notify,
            },
        ))?,
        Commands::Remove { name } => rt.block_on(commands::remove_task(name))?,
        Commands::Pause { name } => rt.block_on(commands::pause_task(name))?,
        Commands::Resume { name } => rt.block_on(commands::resume_task(name))?,
        Commands::RunNow { name } => rt.block_on(commands::run_now(name))?,
        Commands::Status => rt.block_on(commands::status())?,
    }

    Ok(())
}
