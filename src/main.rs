use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use taskdeck::config::Config;
use taskdeck::orchestrator::CommandKind;
use taskdeck::task::TaskId;
use taskdeck::vault::TaskFilter;
use taskdeck::{log, tdlog, Engine, Result, Status};

/// Taskdeck - task synchronization and session orchestration engine
#[derive(Parser, Debug)]
#[command(name = "taskdeck")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    TASKDECK_DEBUG=1    Enable debug logging (alternative to --debug)"
)]
struct Cli {
    /// Enable debug logging (writes to ~/.taskdeck/taskdeck.log)
    #[arg(short = 'd', long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Watch all vaults and print task events as JSON lines (default)
    Watch,

    /// List tasks across vaults
    List {
        /// Limit to one vault
        #[arg(long)]
        vault: Option<String>,

        /// Filter by status (repeatable)
        #[arg(long)]
        status: Vec<String>,

        /// Filter by board phase (repeatable)
        #[arg(long)]
        phase: Vec<String>,

        /// Include deferred and blocked tasks
        #[arg(long)]
        all: bool,
    },

    /// Move a task to another board phase
    Phase {
        vault: String,
        task_id: String,
        phase: String,
    },

    /// Start (or resume) a working session on a task
    Run { vault: String, task_id: String },

    /// Run a scripted command inside a task's session
    Cmd {
        vault: String,
        task_id: String,
        /// One of: complete-task, defer-task, create-task
        command: String,
    },

    /// Forget a task's session id
    ClearSession { vault: String, task_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    log::init_with_debug(cli.debug);

    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let engine = Engine::new(config);
    engine.rescan_all();

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(&engine).await,
        Command::List {
            vault,
            status,
            phase,
            all,
        } => {
            let filter = TaskFilter {
                vaults: vault.map(|v| vec![v]),
                statuses: (!status.is_empty())
                    .then(|| status.iter().map(|s| Status::from_raw(s)).collect()),
                phases: parse_phases(&phase)?,
                assignee: None,
                include_deferred: all,
                include_blocked: all,
            };
            for task in engine.list_tasks(&filter) {
                println!("{}", serde_json::to_string(&task).map_err(taskdeck::Error::Json)?);
            }
            Ok(())
        }
        Command::Phase {
            vault,
            task_id,
            phase,
        } => engine.set_phase(&vault, &TaskId::new(task_id), &phase),
        Command::Run { vault, task_id } => {
            let handle = engine.start_session(&vault, &TaskId::new(task_id)).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&handle).map_err(taskdeck::Error::Json)?
            );
            Ok(())
        }
        Command::Cmd {
            vault,
            task_id,
            command,
        } => {
            let kind: CommandKind =
                serde_json::from_value(serde_json::Value::String(command.clone()))
                    .map_err(|_| taskdeck::Error::CommandFailed {
                        message: format!("unknown command: {}", command),
                    })?;
            let outcome = engine
                .execute_command(&vault, &TaskId::new(task_id), kind)
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).map_err(taskdeck::Error::Json)?
            );
            Ok(())
        }
        Command::ClearSession { vault, task_id } => {
            engine.clear_session(&vault, &TaskId::new(task_id))
        }
    }
}

fn parse_phases(raw: &[String]) -> Result<Option<Vec<taskdeck::Phase>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut phases = Vec::with_capacity(raw.len());
    for p in raw {
        phases.push(
            taskdeck::Phase::parse(p).ok_or_else(|| taskdeck::Error::UnknownPhase(p.clone()))?,
        );
    }
    Ok(Some(phases))
}

/// Run the watchers until ctrl-c, printing every event as a JSON line.
async fn watch(engine: &Engine) -> Result<()> {
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone())?;
    let subscription = engine.subscribe(None)?;
    tdlog!("Watching {} vault(s)", engine.vaults().len());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => {
                println!("{}", serde_json::to_string(&event).map_err(taskdeck::Error::Json)?);
            }
        }
    }

    handle.shutdown();
    Ok(())
}
