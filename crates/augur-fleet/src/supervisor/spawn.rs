// ABOUTME: Launches worker processes for each enabled worker kind and keeps their handles.
// ABOUTME: Each instance is a fresh exec of the worker shim; stop_fleet sends SIGTERM to all.

use super::launch::{LaunchRequest, OutputSink};
use crate::signal::{self, Delivery, SignalKind};
use augur_fleet_core::{instance_name, FleetError, Result, WorkerSpec};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Child;

/// Delay between consecutive instances of one worker kind.
pub const STAGGER_DELAY: Duration = Duration::from_secs(30);

/// How long instance `instance` waits before starting its entry point
pub fn stagger_delay(instance: usize) -> Duration {
    STAGGER_DELAY.saturating_mul(u32::try_from(instance).unwrap_or(u32::MAX))
}

/// Program used to start one worker instance.
///
/// In production this is the running `augur` binary with `server worker`;
/// the supervisor appends the instance arguments.
#[derive(Debug, Clone)]
pub struct ShimCommand {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl ShimCommand {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// `<current exe> server worker`
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec!["server".to_string(), "worker".to_string()],
        ))
    }
}

/// A launched worker instance.
pub struct WorkerHandle {
    kind: String,
    instance: usize,
    pid: Option<u32>,
    child: Child,
}

impl WorkerHandle {
    /// `{kind}_{instance}`
    pub fn name(&self) -> String {
        instance_name(&self.kind, self.instance)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has already exited (reaps it if so)
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Ask the worker to stop. Does not wait for it to exit.
    pub fn terminate(&mut self) -> Delivery {
        if self.has_exited() {
            return Delivery::Vanished;
        }
        match self.pid {
            Some(pid) => signal::send_signal(pid, SignalKind::Terminate),
            None => Delivery::Vanished,
        }
    }
}

/// Owns every worker process of the fleet.
pub struct WorkerSupervisor {
    shim: ShimCommand,
    workers_dir: PathBuf,
    env: Vec<(String, String)>,
    handles: Vec<WorkerHandle>,
}

impl WorkerSupervisor {
    pub fn new(shim: ShimCommand, workers_dir: impl Into<PathBuf>) -> Self {
        Self {
            shim,
            workers_dir: workers_dir.into(),
            env: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Extra environment passed to every worker launched after this call
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.push((key.into(), value.into()));
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Launch request for one instance of a worker kind
    pub fn launch_request(&self, spec: &WorkerSpec, instance: usize) -> LaunchRequest {
        let mut request = LaunchRequest::new(self.shim.program.as_os_str())
            .args(self.shim.leading_args.iter())
            .args([
                "--kind".to_string(),
                spec.kind.clone(),
                "--instance".to_string(),
                instance.to_string(),
                "--port".to_string(),
                spec.port.to_string(),
                "--workers-dir".to_string(),
            ])
            .arg(self.workers_dir.as_os_str())
            .output(OutputSink::Inherit);

        for (key, value) in &self.env {
            request = request.env(key, value);
        }
        request
    }

    /// Launch every instance of every enabled spec, in index order per kind.
    ///
    /// The first launch failure aborts the whole call; instances launched
    /// before it stay owned by the supervisor.
    pub fn start_fleet(&mut self, specs: &[WorkerSpec]) -> Result<&[WorkerHandle]> {
        for spec in specs.iter().filter(|s| s.enabled) {
            for instance in 0..spec.instances {
                tracing::info!("Booting {} #{}", spec.kind, instance + 1);
                let request = self.launch_request(spec, instance);
                let child = request.spawn().map_err(|source| FleetError::WorkerLaunch {
                    name: spec.instance_name(instance),
                    source,
                })?;

                let pid = child.id();
                tracing::debug!(
                    worker = %spec.instance_name(instance),
                    pid = ?pid,
                    port = spec.port,
                    "Spawned worker"
                );
                self.handles.push(WorkerHandle {
                    kind: spec.kind.clone(),
                    instance,
                    pid,
                    child,
                });
            }
        }

        Ok(&self.handles)
    }

    /// Send SIGTERM to every worker and release the handles. Returns how many were asked to stop.
    pub fn stop_fleet(&mut self) -> usize {
        let mut requested = 0;
        for mut handle in self.handles.drain(..) {
            tracing::debug!(
                worker = %handle.name(),
                pid = ?handle.pid(),
                "Shutting down worker process with pid: {:?}...",
                handle.pid()
            );
            match handle.terminate() {
                Delivery::Delivered => requested += 1,
                Delivery::Vanished => {
                    tracing::debug!(worker = %handle.name(), "Worker already exited")
                }
                other => {
                    tracing::warn!(worker = %handle.name(), outcome = ?other, "Could not terminate worker")
                }
            }
        }
        requested
    }
}
