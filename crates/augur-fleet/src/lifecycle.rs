// ABOUTME: Lifecycle controller for `augur server start`: cleanup, broker, housekeeper, workers, server.
// ABOUTME: Every path out of a started controller goes through the shutdown sequence.

use crate::application::{AppHandle, Application};
use crate::broker::{BrokerServer, SharedState, BROKER_SOCKET_VAR};
use crate::control::FleetControl;
use crate::frontend::ServerAdapter;
use crate::housekeeper::Housekeeper;
use crate::shutdown::{ExitSignals, ShutdownSequence};
use crate::signal::SignalKind;
use crate::supervisor::WorkerSupervisor;
use augur_fleet_core::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Pause after signalling a previous fleet, before building a new one.
pub const CLEANUP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    CleaningUp,
    StateCreated,
    CoordinatorRunning,
    WorkersRunning,
    ServerRunning,
    ShuttingDown,
    Halted,
}

/// Flags of `augur server start`
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    pub disable_housekeeper: bool,
    pub skip_cleanup: bool,
}

pub struct LifecycleController {
    app: Arc<Application>,
    fleet: FleetControl,
    supervisor: Option<WorkerSupervisor>,
    options: StartOptions,
    state: LifecycleState,
    shutdown: Arc<ShutdownSequence>,
}

impl LifecycleController {
    pub fn new(
        app: Arc<Application>,
        fleet: FleetControl,
        supervisor: WorkerSupervisor,
        options: StartOptions,
    ) -> Self {
        let shutdown = ShutdownSequence::new(app.clone());
        Self {
            app,
            fleet,
            supervisor: Some(supervisor),
            options,
            state: LifecycleState::Idle,
            shutdown,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn shutdown_sequence(&self) -> &Arc<ShutdownSequence> {
        &self.shutdown
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;
    }

    fn housekeeper_enabled(&self) -> bool {
        !self.options.disable_housekeeper && self.app.config().housekeeper.enabled
    }

    /// Everything before the server: cleanup, shared state, housekeeper, workers.
    ///
    /// Launched workers are handed to the shutdown sequence even when a later
    /// launch fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.options.skip_cleanup {
            tracing::debug!("Skipping cleanup of previous fleet");
        } else {
            self.transition(LifecycleState::CleaningUp);
            let report = self.fleet.broadcast(SignalKind::Terminate);
            tracing::info!(
                signalled = report.delivered.len(),
                "Cleaning up old Augur processes"
            );
            tokio::time::sleep(CLEANUP_GRACE).await;
        }

        if !self.housekeeper_enabled() {
            tracing::info!("Housekeeper disabled, workers will not be started");
            return Ok(());
        }

        let config = self.app.config();
        let socket = config.broker.socket_path_for(std::process::id());
        let specs = config.worker_specs();

        let state = SharedState::new();
        let broker = BrokerServer::start(&socket, state.clone())?;
        self.transition(LifecycleState::StateCreated);

        let housekeeper = Housekeeper::new(state, self.app.as_ref());
        self.app.attach(broker, housekeeper);
        self.transition(LifecycleState::CoordinatorRunning);

        if let Some(mut supervisor) = self.supervisor.take() {
            supervisor.set_env(BROKER_SOCKET_VAR, socket.to_string_lossy());
            let launched = supervisor.start_fleet(&specs).map(|handles| handles.len());
            self.shutdown.adopt_workers(supervisor);
            let launched = launched?;
            tracing::info!(workers = launched, "Workers started");
        }
        self.transition(LifecycleState::WorkersRunning);

        Ok(())
    }

    /// Register the shutdown sequence and block on the front-end server.
    pub async fn serve<F>(&mut self, interrupt: Pin<&mut F>) -> Result<i32>
    where
        F: Future<Output = &'static str>,
    {
        self.shutdown.register()?;
        let adapter = ServerAdapter::new(self.app.config().server.clone(), self.app.as_ref());
        self.transition(LifecycleState::ServerRunning);
        adapter.run(&self.shutdown, interrupt).await
    }

    /// Drive the whole lifecycle. Returns the process exit code.
    ///
    /// Exit signals are installed before anything is started, so a SIGTERM
    /// during startup still reaches the shutdown sequence.
    pub async fn run(mut self) -> i32 {
        let mut signals = match ExitSignals::install() {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!(error = %e, "Could not install signal handlers");
                return self.finish(1);
            }
        };
        self.run_until(async move { signals.recv().await }).await
    }

    /// [`run`](Self::run) with an explicit stop trigger in place of the exit signals.
    pub async fn run_until<F>(mut self, interrupt: F) -> i32
    where
        F: Future<Output = &'static str>,
    {
        tokio::pin!(interrupt);

        let started = tokio::select! {
            result = self.start() => Some(result),
            reason = interrupt.as_mut() => {
                tracing::info!("Received {}, shutting down", reason);
                None
            }
        };

        let code = match started {
            None => 0,
            Some(Ok(())) => match self.serve(interrupt.as_mut()).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::error!(error = %e, "API server failed");
                    1
                }
            },
            Some(Err(e)) => {
                tracing::error!(error = %e, "Startup failed");
                1
            }
        };

        self.finish(code)
    }

    fn finish(&mut self, code: i32) -> i32 {
        self.transition(LifecycleState::ShuttingDown);
        let code = self.shutdown.execute(code).unwrap_or(code);
        self.transition(LifecycleState::Halted);
        code
    }
}
