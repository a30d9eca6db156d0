// ABOUTME: Shared types and configuration for the augur fleet supervisor.
// ABOUTME: Contains config parsing, fleet membership types, and the error enum.

pub mod config;
pub mod error;
pub mod marker;

pub use config::{
    instance_name, BrokerOptions, Config, FleetOptions, HousekeeperOptions, ServerOptions,
    WorkerEntry, WorkerSpec,
};
pub use error::{FleetError, Result};
pub use marker::{FleetMarker, FleetMatcher, ProcessRecord, MARKER_VAR};
