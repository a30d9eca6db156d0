// ABOUTME: Worker supervisor: launches worker processes and runs inside them.
// ABOUTME: spawn.rs is the supervisor side, shim.rs the worker side, launch.rs the shared request type.

pub mod launch;
pub mod shim;
pub mod spawn;

pub use launch::{LaunchRequest, OutputSink};
pub use shim::{run_worker, run_worker_until, WorkerArgs, WorkerOutcome};
pub use spawn::{stagger_delay, ShimCommand, WorkerHandle, WorkerSupervisor, STAGGER_DELAY};
