// ABOUTME: augur-fleet library: process locator, signal broadcaster, worker supervisor, broker and lifecycle.
// ABOUTME: Entry points for each `augur server` subcommand live here; main.rs only parses arguments.

pub mod application;
pub mod broker;
pub mod control;
pub mod frontend;
pub mod housekeeper;
pub mod lifecycle;
pub mod locator;
pub mod shutdown;
pub mod signal;
pub mod supervisor;

pub use application::{AppHandle, Application};
pub use augur_fleet_core::{Config, FleetError, FleetMarker, ProcessRecord};
pub use broker::{BrokerClient, BrokerServer, SharedState, BROKER_SOCKET_VAR};
pub use control::FleetControl;
pub use frontend::{ServerAdapter, ServerMaster};
pub use housekeeper::Housekeeper;
pub use lifecycle::{LifecycleController, LifecycleState, StartOptions};
pub use locator::{ProcessLocator, ProcessTable};
pub use shutdown::{ExitSignals, ShutdownSequence};
pub use signal::{BroadcastReport, SignalBroadcaster, SignalKind};
pub use supervisor::{ShimCommand, WorkerArgs, WorkerOutcome, WorkerSupervisor};

use anyhow::{Context, Result};
use tracing::Instrument;
use std::path::Path;
use std::sync::Arc;

fn load_config(config_path: Option<&Path>) -> Result<(Config, Option<std::path::PathBuf>)> {
    Config::resolve(config_path).context("Failed to load augur config")
}

/// `augur server start`. Returns the exit code.
pub async fn run_start(config_path: Option<&Path>, options: StartOptions) -> i32 {
    let marker = match FleetMarker::from_env() {
        Ok(marker) => marker,
        Err(_) => {
            tracing::error!("Augur is not running inside a virtual environment, refusing to start.");
            tracing::error!(
                "Augur must be installed and run in the same virtual environment. Create one, activate it, reinstall Augur, then run it again."
            );
            tracing::error!("Remove this installation once the virtual environment exists.");
            return 1;
        }
    };

    let (config, loaded_from) = match load_config(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("{:#}", e);
            return 1;
        }
    };
    tracing::info!("Augur application initialized");
    match &loaded_from {
        Some(path) => tracing::info!("Using config file: {}", path.display()),
        None => tracing::info!("No config file found, using built-in defaults"),
    }

    let shim = match ShimCommand::current_exe() {
        Ok(shim) => shim,
        Err(e) => {
            tracing::error!(error = %e, "Could not locate the augur executable");
            return 1;
        }
    };

    let fleet = FleetControl::system(marker, &config);
    let supervisor = WorkerSupervisor::new(shim, config.fleet.workers_directory_expanded());
    let app = Arc::new(Application::new(config, loaded_from));

    LifecycleController::new(app, fleet, supervisor, options)
        .run()
        .await
}

/// Fleet control for the current virtual environment, or None outside one.
///
/// An unreadable config falls back to the defaults so a broken file never
/// prevents stopping a running fleet.
fn fleet_control(config_path: Option<&Path>) -> Option<FleetControl> {
    let marker = match FleetMarker::from_env() {
        Ok(marker) => marker,
        Err(e) => {
            tracing::warn!("{}; no Augur processes to manage", e);
            return None;
        }
    };
    let config = match load_config(config_path) {
        Ok((config, _)) => config,
        Err(e) => {
            tracing::warn!("{:#}; matching processes with default settings", e);
            Config::default()
        }
    };
    Some(FleetControl::system(marker, &config))
}

/// `augur server stop`
pub fn run_stop(config_path: Option<&Path>) -> Result<()> {
    signal_fleet(config_path, SignalKind::Terminate)
}

/// `augur server kill`
pub fn run_kill(config_path: Option<&Path>) -> Result<()> {
    signal_fleet(config_path, SignalKind::Kill)
}

fn signal_fleet(config_path: Option<&Path>, kind: SignalKind) -> Result<()> {
    let Some(control) = fleet_control(config_path) else {
        return Ok(());
    };
    let report = control.broadcast(kind);
    tracing::debug!(
        signal = %kind,
        delivered = report.delivered.len(),
        vanished = report.vanished.len(),
        denied = report.denied.len(),
        "Signalled fleet"
    );
    Ok(())
}

/// `augur server processes`
pub fn run_processes(config_path: Option<&Path>) -> Result<Vec<ProcessRecord>> {
    let Some(control) = fleet_control(config_path) else {
        return Ok(Vec::new());
    };
    let processes = control.processes();
    for process in &processes {
        tracing::info!("Found process {}", process.pid);
    }
    Ok(processes)
}

/// `augur server worker` (spawned by the supervisor, not meant for humans)
pub async fn run_worker(args: WorkerArgs) -> Result<WorkerOutcome> {
    let name = args.name();
    supervisor::run_worker(args)
        .instrument(augur_log::worker_span(&name))
        .await
        .with_context(|| format!("Worker {name} failed"))
}
