mod config;

use std::io::Write as _;
use std::net::TcpStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fuel_core::ipc::{codec, ClientMessage};
use fuel_core::{ConfigFile, Scheduler, Supervisor};
use fuel_store::{Store, TaskCreate};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] fuel_store::Error),
    #[error(transparent)]
    Core(#[from] fuel_core::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Store(e) => store_exit_code(e),
            CliError::Core(fuel_core::Error::Store(e)) => store_exit_code(e),
            CliError::Core(_) => 1,
            CliError::Other(_) => 1,
        }
    }
}

fn store_exit_code(e: &fuel_store::Error) -> i32 {
    match e {
        fuel_store::Error::NotFound(_) | fuel_store::Error::AmbiguousId { .. } => 2,
        _ => 1,
    }
}

#[derive(Parser)]
#[command(name = "fuel", about = "Local agent orchestrator")]
struct Cli {
    /// Path to an explicit config.toml (overrides FUEL_CONFIG and the
    /// `.fuel/config.toml` default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a `.fuel/` directory with a starter config and empty stores
    Init {
        /// Default agent name
        #[arg(long, default_value = "claude")]
        agent: String,
        /// Command used to invoke the agent
        #[arg(long, default_value = "claude")]
        command: String,
        /// IPC port the scheduler will listen on
        #[arg(long, default_value_t = 7171)]
        port: u16,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create a task
    Add {
        /// Task title
        title: String,
    },
    /// Mark a task closed
    Done {
        /// Task id or unique prefix
        id: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        commit: Option<String>,
    },
    /// Reset a failed-stuck task back to open
    Retry {
        /// Task id or unique prefix
        id: String,
    },
    /// Run the scheduler until a shutdown signal arrives
    Consume,
    /// Tell the running supervisor to stop admitting new work
    Pause,
    /// Tell the running supervisor to resume admitting new work
    Resume,
    /// Print every task's status without requiring a running supervisor
    Status,
}

fn cwd() -> anyhow::Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

fn cmd_init(cwd: &std::path::Path, agent: &str, command: &str, port: u16, force: bool) -> Result<(), CliError> {
    let path = config::init(cwd, agent, command, port, force)?;
    println!("Config written to {}", path.display());
    println!("Next: edit it to add further agents, then run `fuel consume`.");
    Ok(())
}

fn cmd_add(store: &Store, title: &str) -> Result<(), CliError> {
    let task = store.tasks.create(TaskCreate {
        title: title.to_string(),
        ..Default::default()
    })?;
    println!("{}", task.id);
    Ok(())
}

fn cmd_done(store: &Store, id: &str, reason: Option<String>, commit: Option<String>) -> Result<(), CliError> {
    let task = store.tasks.done(id, reason, commit)?;
    println!("{} closed", task.id);
    Ok(())
}

fn cmd_retry(store: &Store, fuel_config: &ConfigFile, id: &str) -> Result<(), CliError> {
    let task = store.tasks.find(id)?;
    let agent_name = fuel_config.resolve_agent(task.complexity);
    let max_retries = fuel_config.agents.get(agent_name).map(|a| a.max_retries).unwrap_or(u32::MAX);
    let attempts = store.runs.for_task(&task.id)?.len() as u32;
    let task = store.tasks.retry(id, attempts, max_retries)?;
    println!("{} reset to open", task.id);
    Ok(())
}

fn cmd_status(store: &Store) -> Result<(), CliError> {
    let tasks = store.tasks.all()?;
    println!("{:<10} {:<12} {:<3} {:<8}", "id", "status", "pri", "failed?");
    for task in &tasks {
        let failed_stuck = fuel_store::is_failed(
            task,
            |pid| !Supervisor::is_alive(pid),
            &[],
        );
        println!(
            "{:<10} {:<12} {:<3} {:<8}{}",
            task.id,
            task.status.to_string(),
            task.priority,
            if failed_stuck { "yes" } else { "no" },
            match task.consumed_exit_code {
                Some(code) => format!("  (exit {code})"),
                None => String::new(),
            }
        );
    }
    Ok(())
}

async fn cmd_consume(store: Store, fuel_config: ConfigFile, fuel_dir: PathBuf, cwd: PathBuf) -> Result<(), CliError> {
    let mut scheduler = Scheduler::new(store, fuel_config, fuel_dir, cwd)?;
    scheduler.run().await?;
    // `Scheduler::run` only returns once a shutdown signal has been
    // handled, whether that was a clean drain or a forced kill after a
    // second signal; either way exit with the signal-terminated status.
    std::process::exit(130);
}

fn send_operator_command(port: u16, msg: &ClientMessage) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.write_all(codec::encode(msg).as_bytes())?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let cwd = cwd().map_err(CliError::Other)?;

    if let Commands::Init {
        agent,
        command,
        port,
        force,
    } = &cli.command
    {
        return cmd_init(&cwd, agent, command, *port, *force);
    }

    let fuel_dir = config::fuel_dir(&cwd);
    let store = Store::open(&fuel_dir);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Add { title } => cmd_add(&store, &title),
        Commands::Done { id, reason, commit } => cmd_done(&store, &id, reason, commit),
        Commands::Retry { id } => {
            let fuel_config = config::load_config(cli.config.as_deref(), &cwd).map_err(CliError::Other)?;
            cmd_retry(&store, &fuel_config, &id)
        }
        Commands::Status => cmd_status(&store),
        Commands::Consume => {
            let fuel_config = config::load_config(cli.config.as_deref(), &cwd).map_err(CliError::Other)?;
            cmd_consume(store, fuel_config, fuel_dir, cwd).await
        }
        Commands::Pause => {
            let fuel_config = config::load_config(cli.config.as_deref(), &cwd).map_err(CliError::Other)?;
            send_operator_command(fuel_config.consume_port, &ClientMessage::Pause).map_err(CliError::Other)?;
            println!("pause requested");
            Ok(())
        }
        Commands::Resume => {
            let fuel_config = config::load_config(cli.config.as_deref(), &cwd).map_err(CliError::Other)?;
            send_operator_command(fuel_config.consume_port, &ClientMessage::Resume).map_err(CliError::Other)?;
            println!("resume requested");
            Ok(())
        }
    }
}
