use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use queuectl_core::jobs::PID_FILE;
use queuectl_core::{JobSpec, JobState, Store, Supervisor, Worker};

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Durable job queue with a shell-command worker pool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job from a JSON envelope
    Enqueue {
        /// JSON object: {"command": "...", "id"?, "max_retries"?, "timeout"?, "created_at"?}
        job_json: String,
    },

    /// Worker pool management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Show job counts per state and live worker pids
    Status,

    /// List jobs, one JSON object per line
    List {
        #[arg(long, help = "Filter by state (pending|processing|completed|dead)")]
        state: Option<String>,
    },

    /// Dead-letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Store-backed configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Spawn worker processes
    Start {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Signal all workers to stop after their in-flight job
    Stop,

    /// Run one worker loop in this process (spawned by `worker start`)
    #[command(hide = true)]
    Run {
        #[arg(long, default_value_t = 1)]
        worker_id: u32,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead jobs
    List,

    /// Move a dead job back to pending
    Retry { job_id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a config key (value parsed as JSON, falling back to a raw string)
    Set { key: String, value: String },

    /// Print a config value as JSON
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = cli.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .init();

    match cli.command {
        Commands::Enqueue { job_json } => {
            let spec: JobSpec = match serde_json::from_str(&job_json) {
                Ok(spec) => spec,
                Err(_) => {
                    println!("Invalid JSON for job");
                    return Ok(());
                }
            };
            let store = Store::open().await?;
            let id = store.enqueue(spec).await?;
            println!("enqueued {id}");
        }

        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => {
                let supervisor = Supervisor::new()?;
                let pids = supervisor.start(count)?;
                println!(
                    "Started {} worker(s). PIDs written to {}",
                    pids.len(),
                    PID_FILE
                );
            }
            WorkerCommands::Stop => match Supervisor::new()?.stop()? {
                Some(pids) => println!(
                    "Stop signal sent to {} worker(s) (they will exit after their current job)",
                    pids.len()
                ),
                None => println!("No pid file found; no workers appear to be running"),
            },
            WorkerCommands::Run { worker_id } => run_worker(worker_id).await?,
        },

        Commands::Status => {
            let store = Store::open().await?;
            let counts = store.status_counts().await?;
            println!("{}", "Job counts by state:".bold());
            for state in JobState::ALL {
                println!("  {}: {}", state, counts.get(&state).copied().unwrap_or(0));
            }

            match Supervisor::new()?.status() {
                Ok(workers) if workers.is_empty() => println!("Active worker pids: none"),
                Ok(workers) => {
                    let live: Vec<u32> =
                        workers.iter().filter(|w| w.alive).map(|w| w.pid).collect();
                    let stale: Vec<u32> =
                        workers.iter().filter(|w| !w.alive).map(|w| w.pid).collect();
                    println!("Active worker pids: {}", format!("{live:?}").green());
                    if !stale.is_empty() {
                        println!("Stale worker pids: {}", format!("{stale:?}").yellow());
                    }
                }
                Err(_) => println!("Active worker pids: (error reading pid file)"),
            }
        }

        Commands::List { state } => {
            let state = parse_state(state.as_deref())?;
            let store = Store::open().await?;
            for job in store.list_jobs(state).await? {
                println!("{}", serde_json::to_string(&job)?);
            }
        }

        Commands::Dlq { command } => {
            let store = Store::open().await?;
            match command {
                DlqCommands::List => {
                    for job in store.list_jobs(Some(JobState::Dead)).await? {
                        println!("{}", serde_json::to_string(&job)?);
                    }
                }
                DlqCommands::Retry { job_id } => match store.dlq_retry(&job_id).await {
                    Ok(()) => println!("job moved back to pending"),
                    Err(err) => {
                        eprintln!("{} {err}", "error:".red());
                        std::process::exit(1);
                    }
                },
            }
        }

        Commands::Config { command } => {
            let store = Store::open().await?;
            match command {
                ConfigCommands::Set { key, value } => {
                    let parsed: Value =
                        serde_json::from_str(&value).unwrap_or(Value::String(value));
                    store.set_config(&key, &parsed).await?;
                    println!("config set");
                }
                ConfigCommands::Get { key } => {
                    let value = store.get_config(&key).await?.unwrap_or(Value::Null);
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
            }
        }
    }

    Ok(())
}

fn parse_state(raw: Option<&str>) -> anyhow::Result<Option<JobState>> {
    match raw {
        None => Ok(None),
        Some(raw) => Ok(Some(raw.parse()?)),
    }
}

/// The body of one worker process: open the store, wire shutdown signals
/// to a cancellation token, run the loop until told to stop.
async fn run_worker(worker_id: u32) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let store = Store::open().await?;
    let shutdown = CancellationToken::new();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        info!(worker = worker_id, "received shutdown signal; will exit after current job");
        trigger.cancel();
    });

    let worker = Worker::new(worker_id, store, shutdown).await;
    worker.run().await;
    Ok(())
}
