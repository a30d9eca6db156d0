// ABOUTME: Worker-side half of the supervisor: runs inside each spawned worker process.
// ABOUTME: Waits out the staggered delay, starts the entry point, and exits quietly on SIGTERM/SIGINT.

use super::launch::{LaunchRequest, OutputSink};
use super::spawn::stagger_delay;
use crate::broker::{BrokerClient, BROKER_SOCKET_VAR};
use crate::shutdown::ExitSignals;
use crate::signal::{self, SignalKind};
use anyhow::{Context, Result};
use augur_fleet_core::instance_name;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

pub const WORKER_KIND_VAR: &str = "AUGUR_WORKER_KIND";
pub const WORKER_INSTANCE_VAR: &str = "AUGUR_WORKER_INSTANCE";
pub const WORKER_PORT_VAR: &str = "AUGUR_WORKER_PORT";

/// Parameters of one worker instance, as passed by the supervisor
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub kind: String,
    pub instance: usize,
    pub port: u16,
    pub workers_dir: PathBuf,
    pub broker_socket: Option<PathBuf>,
}

impl WorkerArgs {
    pub fn name(&self) -> String {
        instance_name(&self.kind, self.instance)
    }
}

/// How a worker shim ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Stopped before the entry point was started
    InterruptedDuringDelay,
    /// Stopped while the entry point was running
    Interrupted,
    /// The entry point exited on its own
    Finished,
}

/// `{kind}_start`, run from `{workers_dir}/{kind}` with its output discarded
pub fn entry_point_request(args: &WorkerArgs) -> LaunchRequest {
    let mut request = LaunchRequest::new(format!("{}_start", args.kind))
        .current_dir(args.workers_dir.join(&args.kind))
        .env(WORKER_KIND_VAR, args.kind.clone())
        .env(WORKER_INSTANCE_VAR, args.instance.to_string())
        .env(WORKER_PORT_VAR, args.port.to_string())
        .output(OutputSink::Discard);

    if let Some(socket) = &args.broker_socket {
        request = request.env(BROKER_SOCKET_VAR, socket.to_string_lossy());
    }
    request
}

/// Sleep for `delay` unless interrupted first. Returns false when interrupted.
pub async fn wait_out_delay<F>(delay: Duration, interrupt: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = interrupt => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Entry point of `augur server worker`: runs until the entry point exits or SIGTERM/SIGINT arrives.
pub async fn run_worker(args: WorkerArgs) -> Result<WorkerOutcome> {
    let mut signals = ExitSignals::install().context("installing worker signal handlers")?;
    let interrupt = async move {
        let reason = signals.recv().await;
        tracing::debug!(reason, "Worker interrupted");
    };
    run_worker_until(args, interrupt).await
}

/// Stagger, start `{kind}_start`, then wait on it. Completion of `interrupt`
/// stops the worker: before the entry point exists nothing is started, after
/// it the entry point is sent SIGTERM.
pub async fn run_worker_until<F>(args: WorkerArgs, interrupt: F) -> Result<WorkerOutcome>
where
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);

    let delay = stagger_delay(args.instance);
    tracing::debug!(delay_secs = delay.as_secs(), "Waiting before start");
    if !wait_out_delay(delay, interrupt.as_mut()).await {
        return Ok(WorkerOutcome::InterruptedDuringDelay);
    }

    let request = entry_point_request(&args);
    let mut child = request
        .spawn()
        .with_context(|| format!("Failed to start entry point `{}`", request.display()))?;
    let pid = child.id();
    tracing::info!("{} #{} booted.", args.kind, args.instance + 1);

    if let (Some(socket), Some(pid)) = (&args.broker_socket, pid) {
        announce(socket, &args, pid).await;
    }

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::info!(%status, "Entry point exited"),
                Err(e) => tracing::warn!(error = %e, "Lost track of entry point"),
            }
            Ok(WorkerOutcome::Finished)
        }
        _ = interrupt.as_mut() => {
            if let Some(pid) = pid {
                let _ = signal::send_signal(pid, SignalKind::Terminate);
            }
            Ok(WorkerOutcome::Interrupted)
        }
    }
}

/// Record the booted instance in the broker. Best effort.
async fn announce(socket: &std::path::Path, args: &WorkerArgs, pid: u32) {
    let entry = serde_json::json!({
        "pid": pid,
        "port": args.port,
        "booted_at": chrono::Utc::now().to_rfc3339(),
    });
    let result = async {
        let mut client = BrokerClient::connect(socket).await?;
        client.set(&format!("worker.{}", args.name()), entry).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, "Could not register with broker");
    }
}
