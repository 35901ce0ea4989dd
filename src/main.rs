//! CLIAIMONITOR CLI entry point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use cliaimonitor::application::Server;
use cliaimonitor::domain::models::{Config, TeamsFile};
use cliaimonitor::infrastructure::config::{load_teams, ConfigLoader};
use cliaimonitor::infrastructure::guard::{Acquired, InstanceGuard};
use cliaimonitor::infrastructure::logging;

/// Exit code used after a signalled shutdown.
const EXIT_SIGNALLED: u8 = 130;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "cliaimonitor", version, about = "Multi-agent CLI orchestration server")]
struct Cli {
    /// Path to a config file (defaults to the hierarchical search)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestration server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
        /// Never prompt; honour the configured conflict policy
        #[arg(long)]
        non_interactive: bool,
    },
    /// Run one presence cleanup pass and exit
    Cleanup,
    /// Show ledger agents and exit
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match cli.command {
        Commands::Serve { port, non_interactive } => serve(config, port, non_interactive).await,
        Commands::Cleanup => run_once(config, RunOnce::Cleanup).await,
        Commands::Status => run_once(config, RunOnce::Status).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

fn load_teams_or_default(config: &Config) -> TeamsFile {
    let path = PathBuf::from(&config.base_path).join(&config.teams_file);
    match load_teams(&path) {
        Ok(teams) => teams,
        Err(e) => {
            info!(error = %e, "no teams file loaded, starting with an empty roster");
            TeamsFile::default()
        }
    }
}

async fn serve(mut config: Config, port_override: Option<u16>, non_interactive: bool) -> ExitCode {
    if let Some(port) = port_override {
        config.port = port;
    }

    let base_path = PathBuf::from(&config.base_path);
    if let Err(e) = std::fs::create_dir_all(&base_path) {
        eprintln!("data directory inaccessible: {e}");
        return ExitCode::from(3);
    }
    let _log_guard = logging::init(&config.logging, &base_path);

    let guard = match InstanceGuard::acquire(
        &base_path,
        config.port,
        config.on_conflict,
        !non_interactive,
    )
    .await
    {
        Ok(Acquired::Owned(guard, port)) => {
            config.port = port;
            guard
        }
        Ok(Acquired::Connect { url }) => {
            println!("{url}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!(error = %e, "instance guard refused startup");
            eprintln!("{e}");
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
        }
    };

    let teams = load_teams_or_default(&config);
    let server = match Server::build(config, teams).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "server assembly failed");
            eprintln!("fatal: {e:#}");
            drop(guard);
            return ExitCode::from(3);
        }
    };

    server.spawn_background_tasks();
    info!(port = server.config.port, "orchestration core running; transport may attach");

    let mut guard = guard;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            server.shutdown();
            guard.release();
            return ExitCode::from(EXIT_SIGNALLED);
        }
        () = wait_for_sigterm() => {
            info!("termination signal received");
            server.shutdown();
            guard.release();
            return ExitCode::from(EXIT_SIGNALLED);
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

enum RunOnce {
    Cleanup,
    Status,
}

async fn run_once(config: Config, mode: RunOnce) -> ExitCode {
    let teams = load_teams_or_default(&config);
    let server = match Server::build(config, teams).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            return ExitCode::from(3);
        }
    };

    match mode {
        RunOnce::Cleanup => {
            let report = server.run_cleanup().await;
            println!(
                "cleanup: reaped {} agent(s), protected {}",
                report.reaped.len(),
                report.protected.len()
            );
            for agent_id in &report.reaped {
                println!("  reaped {agent_id}");
            }
        }
        RunOnce::Status => match server.ledger_agents().await {
            Ok(agents) => {
                println!("{} agent(s) in the ledger", agents.len());
                for agent in agents {
                    println!(
                        "  {} [{}] {} pid={:?} task={}",
                        agent.agent_id,
                        agent.status.as_str(),
                        agent.config_name,
                        agent.pid,
                        if agent.current_task.is_empty() { "-" } else { &agent.current_task },
                    );
                }
            }
            Err(e) => {
                eprintln!("status query failed: {e:#}");
                return ExitCode::from(3);
            }
        },
    }

    ExitCode::SUCCESS
}
