//! cexec - container task executor

use anyhow::Context;
use cexec_cli::{commands, logging};
use cexec_config::{ExecutorConfig, LogLevel};
use cexec_core::{LifecycleManager, TaskSpec};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cexec")]
#[command(author, version, about = "Container task executor", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "CEXEC_CONFIG")]
    config: Option<PathBuf>,

    /// Runtime daemon socket or URL
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Namespace containers are created in
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Write out.log and err.log to this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Lifecycle hooks to enable, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    hooks: Option<Vec<String>>,

    #[arg(long, env = "MESOS_AGENT_ENDPOINT", hide = true)]
    agent_endpoint: Option<String>,

    #[arg(long, env = "MESOS_EXECUTOR_ID", hide = true)]
    executor_id: Option<String>,

    #[arg(long, env = "MESOS_FRAMEWORK_ID", hide = true)]
    framework_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task in a new container and exit with its exit code
    Run {
        /// Task id; also names the container
        id: String,
        /// Image reference
        #[arg(long)]
        image: String,
        /// Command run through `sh -c` instead of the image entrypoint
        #[arg(long)]
        command: Option<String>,
        /// Memory limit in bytes (0 = unconstrained)
        #[arg(long, default_value_t = 0)]
        memory: u64,
        /// Relative CPU weight (0 = daemon default)
        #[arg(long, default_value_t = 0)]
        cpu_shares: u64,
        /// Kill the task after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Stop a task, killing it if still running
    Stop {
        /// Task id
        id: String,
    },

    /// Remove a task's container and snapshot
    Rm {
        /// Task id
        id: String,
        /// Stop the task first
        #[arg(short, long)]
        force: bool,
    },
}

/// A parsed command, validated before connecting to the daemon
enum Action {
    Run(TaskSpec, Option<Duration>),
    Stop(String),
    Remove(String, bool),
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ExecutorConfig> {
        let mut config = match &self.config {
            Some(path) => ExecutorConfig::load_from(path)?,
            None => ExecutorConfig::load().unwrap_or_else(|e| {
                eprintln!("Warning: Could not load config ({}), using defaults", e);
                ExecutorConfig::default()
            }),
        };

        if let Some(socket) = &self.socket {
            config.runtime.socket = socket.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.runtime.namespace = namespace.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.logging.log_dir = Some(dir.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = LogLevel::from(level.as_str());
        }
        if let Some(hooks) = &self.hooks {
            config.executor.hooks = hooks.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    logging::init_logging(&config.logging)?;
    tracing::info!(
        agent = cli.agent_endpoint.as_deref().unwrap_or("-"),
        executor_id = cli.executor_id.as_deref().unwrap_or("-"),
        framework_id = cli.framework_id.as_deref().unwrap_or("-"),
        namespace = %config.runtime.namespace,
        "executor starting"
    );

    // Reject bad tasks before touching the daemon
    let action = match cli.command {
        Commands::Run {
            id,
            image,
            command,
            memory,
            cpu_shares,
            timeout,
        } => {
            let mut task = TaskSpec::new(id, image)
                .with_memory_limit(memory)
                .with_cpu_shares(cpu_shares);
            task.command = command;
            task.validate()?;
            let timeout = timeout
                .map(Duration::from_secs)
                .or_else(|| config.executor.stop_timeout());
            Action::Run(task, timeout)
        }
        Commands::Stop { id } => Action::Stop(id),
        Commands::Rm { id, force } => Action::Remove(id, force),
    };

    let client = cexec_runtime::create_client(&config.runtime)
        .await
        .with_context(|| format!("Failed to connect to {}", config.runtime.socket))?;

    let span = tracing::info_span!(
        "executor",
        executor_id = cli.executor_id.as_deref().unwrap_or("-"),
        namespace = %config.runtime.namespace,
    );
    let manager = LifecycleManager::from_config(Arc::from(client), &config).with_span(span);

    match action {
        Action::Run(task, timeout) => commands::run_task(&manager, &task, timeout).await,
        Action::Stop(id) => commands::stop(&manager, &id).await.map(|()| 0),
        Action::Remove(id, force) => commands::remove(&manager, &id, force).await.map(|()| 0),
    }
}
