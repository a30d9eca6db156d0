// ABOUTME: Sends SIGTERM or SIGKILL to fleet processes.
// ABOUTME: Vanished targets are expected and never reported as errors.

use augur_fleet_core::ProcessRecord;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::fmt;

/// Signals the broadcaster knows how to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalKind {
    /// Graceful stop (SIGTERM)
    #[default]
    Terminate,
    /// Forced stop (SIGKILL)
    Kill,
}

impl SignalKind {
    pub fn as_signal(self) -> Signal {
        match self {
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_signal().as_str())
    }
}

/// Outcome of one signal delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The process was already gone
    Vanished,
    /// The process exists but belongs to someone else
    Denied,
    Failed(String),
}

/// Delivers a signal to a single pid.
pub trait SignalSink: Send + Sync {
    fn send(&self, pid: u32, kind: SignalKind) -> Delivery;
}

/// Real delivery via kill(2).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSignals;

impl SignalSink for OsSignals {
    fn send(&self, pid: u32, kind: SignalKind) -> Delivery {
        send_signal(pid, kind)
    }
}

// pid 0 and negative pids address process groups in kill(2); never let a
// record turn into a group signal.
fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

fn classify(result: nix::Result<()>) -> Delivery {
    match result {
        Ok(()) => Delivery::Delivered,
        Err(Errno::ESRCH) => Delivery::Vanished,
        Err(Errno::EPERM) => Delivery::Denied,
        Err(e) => Delivery::Failed(e.to_string()),
    }
}

/// Send a signal to one process
pub fn send_signal(pid: u32, kind: SignalKind) -> Delivery {
    match to_pid(pid) {
        Some(target) => classify(kill(target, kind.as_signal())),
        None => Delivery::Failed(format!("invalid pid {pid}")),
    }
}

/// Send a signal to every process in a process group
pub fn send_group_signal(pgid: u32, kind: SignalKind) -> Delivery {
    match to_pid(pgid) {
        Some(group) => classify(killpg(group, kind.as_signal())),
        None => Delivery::Failed(format!("invalid process group {pgid}")),
    }
}

/// What happened to each pid in one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<u32>,
    pub vanished: Vec<u32>,
    pub denied: Vec<u32>,
    pub failed: Vec<u32>,
}

impl BroadcastReport {
    /// Number of processes a broadcast was attempted on
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.vanished.len() + self.denied.len() + self.failed.len()
    }
}

/// Sends one signal to a list of processes, once each, with no retry or escalation.
pub struct SignalBroadcaster {
    sink: Box<dyn SignalSink>,
}

impl Default for SignalBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBroadcaster {
    pub fn new() -> Self {
        Self::with_sink(OsSignals)
    }

    pub fn with_sink(sink: impl SignalSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn broadcast(&self, kind: SignalKind, processes: &[ProcessRecord]) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for process in processes {
            tracing::info!(pid = process.pid, signal = %kind, "Stopping process {}", process.pid);
            match self.sink.send(process.pid, kind) {
                Delivery::Delivered => report.delivered.push(process.pid),
                Delivery::Vanished => {
                    tracing::debug!(pid = process.pid, "Process already exited");
                    report.vanished.push(process.pid);
                }
                Delivery::Denied => {
                    tracing::warn!(pid = process.pid, signal = %kind, "Not permitted to signal process");
                    report.denied.push(process.pid);
                }
                Delivery::Failed(error) => {
                    tracing::warn!(pid = process.pid, signal = %kind, %error, "Failed to signal process");
                    report.failed.push(process.pid);
                }
            }
        }

        report
    }
}
