// ABOUTME: Finds the OS processes that belong to this fleet.
// ABOUTME: Snapshots the process table via procfs and filters it with a FleetMatcher.

use augur_fleet_core::{FleetError, FleetMatcher, ProcessRecord, Result};
use procfs::process::Process;
use procfs::ProcError;
use std::collections::HashMap;

/// Source of process snapshots.
pub trait ProcessTable: Send + Sync {
    /// Snapshot every process whose command line and environment could both be read.
    ///
    /// Processes that exit or deny access mid-scan are left out; only a table
    /// that cannot be enumerated at all is an error.
    fn scan(&self) -> Result<Vec<ProcessRecord>>;
}

/// The host's process table, read from /proc.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcTable;

impl ProcessTable for ProcTable {
    fn scan(&self) -> Result<Vec<ProcessRecord>> {
        let processes =
            procfs::process::all_processes().map_err(|e| FleetError::ProcessScan(e.to_string()))?;

        Ok(processes
            .filter_map(|p| p.ok())
            .filter_map(|p| snapshot(&p))
            .collect())
    }
}

fn snapshot(process: &Process) -> Option<ProcessRecord> {
    let argv = process
        .cmdline()
        .map_err(|e| note_skipped(process.pid, &e))
        .ok()?;
    let environ = process
        .environ()
        .map_err(|e| note_skipped(process.pid, &e))
        .ok()?;

    let environ: HashMap<String, String> = environ
        .into_iter()
        .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
        .collect();

    let pid = u32::try_from(process.pid).ok()?;
    Some(ProcessRecord::new(pid, argv, environ))
}

// Vanished and unreadable processes are both expected during a scan: the first
// is a race with process exit, the second is every process we don't own.
fn note_skipped(pid: i32, err: &ProcError) {
    match err {
        ProcError::NotFound(_) => tracing::trace!(pid, "process exited during scan"),
        ProcError::PermissionDenied(_) => tracing::trace!(pid, "process not readable, skipping"),
        other => tracing::debug!(pid, error = %other, "skipping process"),
    }
}

/// Lists the processes of our fleet.
pub struct ProcessLocator {
    table: Box<dyn ProcessTable>,
    matcher: FleetMatcher,
}

impl ProcessLocator {
    /// Locator over the host's process table
    pub fn new(matcher: FleetMatcher) -> Self {
        Self::with_table(ProcTable, matcher)
    }

    pub fn with_table(table: impl ProcessTable + 'static, matcher: FleetMatcher) -> Self {
        Self {
            table: Box::new(table),
            matcher,
        }
    }

    pub fn matcher(&self) -> &FleetMatcher {
        &self.matcher
    }

    /// Every fleet process except the caller, in process-table order.
    ///
    /// Never fails: an unreadable process table is logged and yields an empty fleet.
    pub fn list_fleet_processes(&self) -> Vec<ProcessRecord> {
        match self.table.scan() {
            Ok(records) => records
                .into_iter()
                .filter(|record| self.matcher.is_member(record))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not scan processes");
                Vec::new()
            }
        }
    }
}
