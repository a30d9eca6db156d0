// ABOUTME: Tracing setup for augur: the supervisor CLI and the worker processes it spawns.
// ABOUTME: Workers log inside a `worker` span so lines on the shared stderr say which instance wrote them.

use tracing_subscriber::EnvFilter;

/// Crate whose events workers keep at INFO while everything else is held to WARN
pub const FLEET_CRATE: &str = "augur_fleet";

fn supervisor_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn worker_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{FLEET_CRATE}=info")))
}

/// Logging for `augur server start|stop|kill|processes`. RUST_LOG replaces the INFO default.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(supervisor_filter())
        .with_target(false)
        .try_init();
}

/// Logging for a worker process. Workers share the supervisor's stderr, so only
/// augur_fleet events reach INFO unless RUST_LOG says otherwise.
pub fn init_worker() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(worker_filter())
        .with_target(false)
        .try_init();
}

/// Span wrapping everything one worker instance logs, e.g. `worker{name=repo_collector_1}`
pub fn worker_span(name: &str) -> tracing::Span {
    tracing::info_span!("worker", name = %name)
}
