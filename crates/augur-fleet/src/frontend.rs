// ABOUTME: Adapter for the front-end API server: starts it in its own process group and waits on it.
// ABOUTME: The server master handle halts the whole group during shutdown.

use crate::application::AppHandle;
use crate::shutdown::ShutdownSequence;
use crate::signal::{self, Delivery, SignalKind};
use crate::supervisor::{LaunchRequest, OutputSink};
use augur_fleet_core::{FleetError, Result, ServerOptions};
use std::future::Future;
use std::pin::Pin;

pub const SERVER_HOST_VAR: &str = "AUGUR_SERVER_HOST";
pub const SERVER_PORT_VAR: &str = "AUGUR_SERVER_PORT";
pub const CONFIG_VAR: &str = "AUGUR_CONFIG";

/// Handle on a running server's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMaster {
    pgid: u32,
}

impl ServerMaster {
    pub fn new(pgid: u32) -> Self {
        Self { pgid }
    }

    pub fn pgid(&self) -> u32 {
        self.pgid
    }

    /// Ask every process in the server's group to stop
    pub fn halt(&self) -> Delivery {
        signal::send_group_signal(self.pgid, SignalKind::Terminate)
    }
}

pub struct ServerAdapter {
    options: ServerOptions,
    request: LaunchRequest,
}

impl ServerAdapter {
    pub fn new(options: ServerOptions, app: &dyn AppHandle) -> Self {
        let mut request = LaunchRequest::new(options.command.clone())
            .args(options.expanded_args())
            .env(SERVER_HOST_VAR, options.host.clone())
            .env(SERVER_PORT_VAR, options.port.to_string())
            .output(OutputSink::Append(options.log_file_expanded()))
            .in_new_process_group();

        if let Some(dir) = options.working_directory_expanded() {
            request = request.current_dir(dir);
        }
        if let Some(path) = app.config_path() {
            request = request.env(CONFIG_VAR, path.to_string_lossy());
        }

        Self { options, request }
    }

    pub fn launch_request(&self) -> &LaunchRequest {
        &self.request
    }

    /// Start the server and block until it exits or `interrupt` completes.
    ///
    /// The server's master handle is given to `shutdown` before waiting.
    /// Returns the exit code the supervisor should finish with.
    pub async fn run<F>(self, shutdown: &ShutdownSequence, interrupt: Pin<&mut F>) -> Result<i32>
    where
        F: Future<Output = &'static str>,
    {
        tracing::debug!(command = %self.request.display(), "Starting API server");
        let mut child = self
            .request
            .spawn()
            .map_err(|source| FleetError::ServerLaunch {
                command: self.options.command.clone(),
                source,
            })?;

        if let Some(pid) = child.id() {
            shutdown.set_master(ServerMaster::new(pid));
        }

        tracing::info!("Augur's API server is running at: {}", self.options.url());
        tracing::info!(
            "All API server logging (including errors) will be written to {}",
            self.options.log_file_expanded().display()
        );

        let code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => {
                    tracing::info!("API server exited");
                    0
                }
                Ok(status) => {
                    tracing::error!(%status, "API server exited unexpectedly");
                    status.code().unwrap_or(1)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Lost track of API server");
                    1
                }
            },
            reason = interrupt => {
                tracing::info!("Received {}, shutting down", reason);
                0
            }
        };

        Ok(code)
    }
}
