// ABOUTME: Fleet membership types: the environment marker and process snapshots.
// ABOUTME: FleetMatcher is the pure predicate deciding which processes belong to our fleet.

use crate::error::{FleetError, Result};
use std::collections::HashMap;
use std::fmt;

/// Environment variable whose value identifies a fleet.
pub const MARKER_VAR: &str = "VIRTUAL_ENV";

/// Identifier shared by every process of one fleet: the virtual environment
/// the supervisor was launched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FleetMarker(String);

impl FleetMarker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the marker of the current process.
    ///
    /// Fails with [`FleetError::NotInVirtualEnv`] when the variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        match std::env::var(MARKER_VAR) {
            Ok(value) if !value.is_empty() => Ok(Self(value)),
            _ => Err(FleetError::NotInVirtualEnv),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FleetMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one OS process taken during a scan. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub argv: Vec<String>,
    pub environ: HashMap<String, String>,
}

impl ProcessRecord {
    pub fn new(pid: u32, argv: Vec<String>, environ: HashMap<String, String>) -> Self {
        Self { pid, argv, environ }
    }

    /// The process's own marker value, if it has one
    pub fn marker(&self) -> Option<&str> {
        self.environ.get(MARKER_VAR).map(String::as_str)
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    /// File name of argv[0]
    pub fn program(&self) -> Option<&str> {
        let first = self.argv.first()?;
        first.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

/// Decides fleet membership for process snapshots.
///
/// A process is a member when its marker equals ours and it is not the caller,
/// provided its command line names one of the interpreter tokens or its
/// executable is one of the program names. Both comparisons ignore case.
#[derive(Debug, Clone)]
pub struct FleetMatcher {
    marker: FleetMarker,
    tokens: Vec<String>,
    programs: Vec<String>,
    self_pid: u32,
}

fn normalized<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

impl FleetMatcher {
    pub fn new<I, S>(marker: FleetMarker, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            marker,
            tokens: normalized(tokens),
            programs: Vec::new(),
            self_pid: std::process::id(),
        }
    }

    /// Also accept processes whose argv[0] file name is one of `names`.
    /// Only the executable is compared, so `vim augur.toml` is not an `augur` process.
    pub fn with_programs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.programs = normalized(names);
        self
    }

    /// Override the pid treated as "ourselves"
    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = pid;
        self
    }

    pub fn marker(&self) -> &FleetMarker {
        &self.marker
    }

    pub fn self_pid(&self) -> u32 {
        self.self_pid
    }

    pub fn is_member(&self, record: &ProcessRecord) -> bool {
        if record.pid == self.self_pid {
            return false;
        }
        if record.marker() != Some(self.marker.as_str()) {
            return false;
        }
        let command_line = record.command_line().to_lowercase();
        if self.tokens.iter().any(|token| command_line.contains(token)) {
            return true;
        }
        match record.program() {
            Some(program) => {
                let program = program.to_lowercase();
                self.programs.iter().any(|name| *name == program)
            }
            None => false,
        }
    }
}
