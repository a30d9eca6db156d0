// ABOUTME: Out-of-band fleet control used by `server stop|kill|processes` and startup cleanup.
// ABOUTME: Pairs a ProcessLocator with a SignalBroadcaster.

use crate::locator::ProcessLocator;
use crate::signal::{BroadcastReport, SignalBroadcaster, SignalKind};
use augur_fleet_core::{Config, FleetMarker, FleetMatcher, ProcessRecord};

pub struct FleetControl {
    locator: ProcessLocator,
    broadcaster: SignalBroadcaster,
}

impl FleetControl {
    pub fn new(locator: ProcessLocator, broadcaster: SignalBroadcaster) -> Self {
        Self {
            locator,
            broadcaster,
        }
    }

    /// Control over the host's processes for the given marker
    pub fn system(marker: FleetMarker, config: &Config) -> Self {
        let matcher = FleetMatcher::new(marker, &config.fleet.interpreter_tokens)
            .with_programs(&config.fleet.program_names);
        Self::new(ProcessLocator::new(matcher), SignalBroadcaster::new())
    }

    pub fn processes(&self) -> Vec<ProcessRecord> {
        self.locator.list_fleet_processes()
    }

    /// Signal every process currently in the fleet
    pub fn broadcast(&self, kind: SignalKind) -> BroadcastReport {
        let processes = self.processes();
        if processes.is_empty() {
            tracing::debug!(signal = %kind, "No fleet processes found");
        }
        self.broadcaster.broadcast(kind, &processes)
    }
}
