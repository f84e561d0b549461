use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use maos::{ExecutionMode, MaosConfig, Orchestrator, RunOutcome};

#[derive(Parser)]
#[command(name = "maos", about = "Multi-agent orchestration of external LLM CLI tools")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project for the objective and drive it to completion.
    Run {
        /// The natural-language project objective.
        objective: String,
        /// Override the configured execution mode.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Resume an existing project by id.
    Resume {
        project_id: String,
        #[arg(long)]
        mode: Option<String>,
    },
    /// List known project ids.
    List,
}

fn parse_mode(raw: Option<&str>) -> Result<Option<ExecutionMode>, String> {
    match raw {
        None => Ok(None),
        Some("sequential") => Ok(Some(ExecutionMode::Sequential)),
        Some("parallel") => Ok(Some(ExecutionMode::Parallel)),
        Some("hybrid") => Ok(Some(ExecutionMode::Hybrid)),
        Some(other) => Err(format!("unknown mode: {}", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match MaosConfig::load(path).await {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to load config");
                return ExitCode::from(2);
            }
        },
        None => MaosConfig::default(),
    };

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    // Ctrl-C pauses cooperatively: no in-flight subprocess is killed, the
    // loop stops taking new work and the project stays resumable.
    let signals = orchestrator.signals();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; pausing project");
            signals.pause();
        }
    });

    let outcome = match cli.command {
        Command::Run { objective, mode } => {
            let mode = match parse_mode(mode.as_deref()) {
                Ok(mode) => mode,
                Err(e) => {
                    error!("{}", e);
                    return ExitCode::from(2);
                }
            };
            match run_new(&orchestrator, &objective, mode).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Run failed");
                    return ExitCode::from(1);
                }
            }
        }
        Command::Resume { project_id, mode } => {
            let mode = match parse_mode(mode.as_deref()) {
                Ok(mode) => mode,
                Err(e) => {
                    error!("{}", e);
                    return ExitCode::from(2);
                }
            };
            match orchestrator.run(&project_id, mode).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Resume failed");
                    return ExitCode::from(1);
                }
            }
        }
        Command::List => {
            match orchestrator.store().list().await {
                Ok(ids) => {
                    for id in ids {
                        println!("{}", id);
                    }
                    return ExitCode::SUCCESS;
                }
                Err(e) => {
                    error!(error = %e, "List failed");
                    return ExitCode::from(1);
                }
            }
        }
    };

    info!(outcome = ?outcome, "Done");
    exit_code_for(outcome)
}

async fn run_new(
    orchestrator: &Orchestrator,
    objective: &str,
    mode: Option<ExecutionMode>,
) -> maos::Result<RunOutcome> {
    // Mode overrides apply to the whole run, so stash them before starting.
    match mode {
        None => {
            let (project_id, outcome) = orchestrator.start(objective).await?;
            info!(project_id = %project_id, "Project finished");
            Ok(outcome)
        }
        Some(mode) => {
            let (project_id, outcome) = orchestrator.start_with_mode(objective, mode).await?;
            info!(project_id = %project_id, "Project finished");
            Ok(outcome)
        }
    }
}

fn exit_code_for(outcome: RunOutcome) -> ExitCode {
    ExitCode::from(outcome.exit_code() as u8)
}
