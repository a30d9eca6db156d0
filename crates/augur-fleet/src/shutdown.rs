// ABOUTME: The supervisor's shutdown sequence and the exit signals that trigger it.
// ABOUTME: The sequence runs at most once per process: app shutdown, worker terminate, server halt.

use crate::application::AppHandle;
use crate::frontend::ServerMaster;
use crate::signal::Delivery;
use crate::supervisor::WorkerSupervisor;
use augur_fleet_core::{FleetError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// SIGTERM, SIGINT and SIGHUP, installed together.
pub struct ExitSignals {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
}

impl ExitSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next exit signal and name it
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

static REGISTERED: OnceLock<Arc<ShutdownSequence>> = OnceLock::new();

/// Everything that has to be released when the supervisor exits.
pub struct ShutdownSequence {
    app: Arc<dyn AppHandle>,
    workers: Mutex<Option<WorkerSupervisor>>,
    master: Mutex<Option<ServerMaster>>,
    fired: AtomicBool,
}

impl ShutdownSequence {
    pub fn new(app: Arc<dyn AppHandle>) -> Arc<Self> {
        Arc::new(Self {
            app,
            workers: Mutex::new(None),
            master: Mutex::new(None),
            fired: AtomicBool::new(false),
        })
    }

    /// Take ownership of the fleet's workers
    pub fn adopt_workers(&self, supervisor: WorkerSupervisor) {
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = Some(supervisor);
    }

    pub fn set_master(&self, master: ServerMaster) {
        *self.master.lock().unwrap_or_else(|e| e.into_inner()) = Some(master);
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, WorkerSupervisor::len)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Make this the process's only exit-time cleanup.
    ///
    /// Fails if a sequence was already registered. Replaces the panic hook, so
    /// a panic on the main thread runs the sequence before the process dies.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        REGISTERED
            .set(Arc::clone(self))
            .map_err(|_| FleetError::ShutdownAlreadyRegistered)?;

        let _ = std::panic::take_hook();
        let sequence = Arc::clone(self);
        std::panic::set_hook(Box::new(move |info| {
            eprintln!("{info}");
            if std::thread::current().name() == Some("main") {
                sequence.execute(101);
            }
        }));
        Ok(())
    }

    /// The sequence registered for this process, if any
    pub fn registered() -> Option<Arc<ShutdownSequence>> {
        REGISTERED.get().cloned()
    }

    /// Run the cleanup steps. Only the first call does anything; it returns
    /// `Some(exit_code)`, later calls return `None`.
    ///
    /// Each step runs even if an earlier one failed. Nothing waits for
    /// workers or the server to actually exit.
    pub fn execute(&self, exit_code: i32) -> Option<i32> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return None;
        }

        tracing::info!("Shutdown started");
        self.app.shutdown();

        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut supervisor) = workers {
            let stopped = supervisor.stop_fleet();
            tracing::debug!(stopped, "Workers asked to terminate");
        }

        let master = self.master.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(master) = master {
            tracing::debug!(pgid = master.pgid(), "Shutting down API server");
            match master.halt() {
                Delivery::Delivered | Delivery::Vanished => {}
                other => tracing::warn!(pgid = master.pgid(), outcome = ?other, "Could not halt API server"),
            }
        }

        tracing::info!(exit_code, "Shutdown complete");
        Some(exit_code)
    }
}
