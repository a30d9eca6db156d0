// ABOUTME: Coordination component started with the broker; publishes the worker registry and a heartbeat.
// ABOUTME: Job scheduling lives in the workers and is not handled here.

use crate::application::AppHandle;
use crate::broker::SharedState;
use serde_json::{json, Map, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const STATUS_KEY: &str = "housekeeper.status";
pub const HEARTBEAT_KEY: &str = "housekeeper.heartbeat";
pub const WORKERS_KEY: &str = "workers";

pub struct Housekeeper {
    state: SharedState,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Housekeeper {
    /// Publish the registry and start the heartbeat. Must be called from within a tokio runtime.
    pub fn new(state: SharedState, app: &dyn AppHandle) -> Self {
        let config = app.config();

        let registry: Map<String, Value> = config
            .worker_specs()
            .into_iter()
            .filter(|spec| spec.enabled)
            .map(|spec| {
                (
                    spec.kind.clone(),
                    json!({ "port": spec.port, "instances": spec.instances }),
                )
            })
            .collect();
        tracing::debug!(kinds = registry.len(), "Publishing worker registry");
        state.set(WORKERS_KEY, Value::Object(registry));
        state.set(STATUS_KEY, json!("running"));

        let period = Duration::from_secs(config.housekeeper.heartbeat_secs.max(1));
        let beat = state.clone();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                beat.set(HEARTBEAT_KEY, json!(chrono::Utc::now().to_rfc3339()));
            }
        });

        tracing::info!("Housekeeper started");
        Self {
            state,
            heartbeat: Mutex::new(Some(heartbeat)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop the heartbeat and mark the housekeeper stopped. Safe to call more than once.
    pub fn shutdown(&self) {
        let task = self
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            self.state.set(STATUS_KEY, json!("stopped"));
            tracing::info!("Housekeeper stopped");
        }
    }
}
