// ABOUTME: CLI entry point for the augur binary.
// ABOUTME: Parses `augur server ...` and dispatches to the augur_fleet entry points.

use anyhow::Result;
use augur_fleet::{StartOptions, WorkerArgs, BROKER_SOCKET_VAR};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "augur")]
#[command(about = "Augur backend supervisor")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true, env = "AUGUR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Control the Augur backend server
    #[command(subcommand)]
    Server(ServerCommands),
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Start Augur's backend server
    Start {
        /// Do not start the housekeeper (or any workers)
        #[arg(long)]
        disable_housekeeper: bool,

        /// Do not stop leftover Augur processes before starting
        #[arg(long)]
        skip_cleanup: bool,
    },

    /// Send SIGTERM to all Augur processes of this virtual environment
    Stop,

    /// Send SIGKILL to all Augur processes of this virtual environment
    Kill,

    /// List the Augur processes of this virtual environment
    Processes,

    /// Run one worker instance (spawned by `server start`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        kind: String,

        #[arg(long)]
        instance: usize,

        #[arg(long)]
        port: u16,

        #[arg(long, default_value = "workers")]
        workers_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Server(cmd) => match cmd {
            ServerCommands::Start {
                disable_housekeeper,
                skip_cleanup,
            } => {
                augur_log::init();
                let options = StartOptions {
                    disable_housekeeper,
                    skip_cleanup,
                };
                let code = augur_fleet::run_start(config, options).await;
                std::process::exit(code);
            }
            ServerCommands::Stop => {
                augur_log::init();
                augur_fleet::run_stop(config)?;
            }
            ServerCommands::Kill => {
                augur_log::init();
                augur_fleet::run_kill(config)?;
            }
            ServerCommands::Processes => {
                augur_log::init();
                augur_fleet::run_processes(config)?;
            }
            ServerCommands::Worker {
                kind,
                instance,
                port,
                workers_dir,
            } => {
                augur_log::init_worker();
                let args = WorkerArgs {
                    kind,
                    instance,
                    port,
                    workers_dir,
                    broker_socket: std::env::var_os(BROKER_SOCKET_VAR).map(PathBuf::from),
                };
                let outcome = augur_fleet::run_worker(args).await?;
                tracing::debug!(?outcome, "Worker exiting");
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_flags() {
        let cli = Cli::try_parse_from([
            "augur",
            "server",
            "start",
            "--disable-housekeeper",
            "--skip-cleanup",
        ])
        .unwrap();
        match cli.command {
            Commands::Server(ServerCommands::Start {
                disable_housekeeper,
                skip_cleanup,
            }) => {
                assert!(disable_housekeeper);
                assert!(skip_cleanup);
            }
            _ => panic!("expected server start"),
        }
    }

    #[test]
    fn test_worker_arguments() {
        let cli = Cli::try_parse_from([
            "augur",
            "server",
            "worker",
            "--kind",
            "repo_collector",
            "--instance",
            "1",
            "--port",
            "5010",
            "--config",
            "/etc/augur.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/augur.toml")));
        match cli.command {
            Commands::Server(ServerCommands::Worker {
                kind,
                instance,
                port,
                workers_dir,
            }) => {
                assert_eq!(kind, "repo_collector");
                assert_eq!(instance, 1);
                assert_eq!(port, 5010);
                assert_eq!(workers_dir, PathBuf::from("workers"));
            }
            _ => panic!("expected server worker"),
        }
    }

    #[test]
    fn test_unknown_server_command_is_rejected() {
        assert!(Cli::try_parse_from(["augur", "server", "restart"]).is_err());
    }
}
