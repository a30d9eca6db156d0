// ABOUTME: Configuration for the augur supervisor, its workers and the front-end server.
// ABOUTME: Loaded from a TOML file with sensible defaults for every section.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = "augur.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Front-end server options
    #[serde(default)]
    pub server: ServerOptions,

    /// Coordination component options
    #[serde(default)]
    pub housekeeper: HousekeeperOptions,

    /// Shared coordination state options
    #[serde(default)]
    pub broker: BrokerOptions,

    /// Fleet membership and worker layout
    #[serde(default)]
    pub fleet: FleetOptions,

    /// Worker kinds keyed by name
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerOptions {
    /// Address the API server binds to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the API server binds to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server executable (looked up on PATH)
    #[serde(default = "default_server_command")]
    pub command: String,

    /// Arguments; `{host}` and `{port}` are substituted
    #[serde(default = "default_server_args")]
    pub args: Vec<String>,

    /// Directory the server is started in
    #[serde(default)]
    pub working_directory: Option<String>,

    /// File receiving the server's stdout and stderr
    #[serde(default = "default_server_log")]
    pub log_file: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_server_command() -> String {
    "gunicorn".to_string()
}

fn default_server_args() -> Vec<String> {
    vec![
        "--bind".to_string(),
        "{host}:{port}".to_string(),
        "augur.server:app".to_string(),
    ]
}

fn default_server_log() -> String {
    "logs/server.log".to_string()
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            command: default_server_command(),
            args: default_server_args(),
            working_directory: None,
            log_file: default_server_log(),
        }
    }
}

impl ServerOptions {
    /// Arguments with `{host}` and `{port}` placeholders filled in
    pub fn expanded_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{host}", &self.host).replace("{port}", &port))
            .collect()
    }

    /// Public URL of the API server, for log lines
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Expand ~ in the log file path
    pub fn log_file_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.log_file).into_owned().into()
    }

    /// Expand ~ in the working directory, if one is set
    pub fn working_directory_expanded(&self) -> Option<PathBuf> {
        self.working_directory
            .as_deref()
            .map(|dir| shellexpand::tilde(dir).into_owned().into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HousekeeperOptions {
    /// Start the housekeeper (and with it the broker and workers)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between heartbeat writes into the broker
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_secs() -> u64 {
    60
}

impl Default for HousekeeperOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerOptions {
    /// Unix socket path; defaults to a per-supervisor path in the temp dir
    #[serde(default)]
    pub socket_path: Option<String>,
}

impl BrokerOptions {
    /// Socket path for a supervisor with the given pid
    pub fn socket_path_for(&self, pid: u32) -> PathBuf {
        match &self.socket_path {
            Some(path) => shellexpand::tilde(path).into_owned().into(),
            None => std::env::temp_dir().join(format!("augur-broker-{pid}.sock")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetOptions {
    /// Command-line substrings that identify a managed interpreter process
    #[serde(default = "default_interpreter_tokens")]
    pub interpreter_tokens: Vec<String>,

    /// Executable names (file name of argv[0]) that identify a managed process
    #[serde(default = "default_program_names")]
    pub program_names: Vec<String>,

    /// Directory holding one subdirectory per worker kind
    #[serde(default = "default_workers_directory")]
    pub workers_directory: String,
}

fn default_interpreter_tokens() -> Vec<String> {
    vec!["python".to_string()]
}

fn default_program_names() -> Vec<String> {
    vec!["augur".to_string()]
}

fn default_workers_directory() -> String {
    "workers".to_string()
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            interpreter_tokens: default_interpreter_tokens(),
            program_names: default_program_names(),
            workers_directory: default_workers_directory(),
        }
    }
}

impl FleetOptions {
    /// Expand ~ in the workers directory
    pub fn workers_directory_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.workers_directory)
            .into_owned()
            .into()
    }
}

/// One `[workers.<kind>]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerEntry {
    #[serde(default = "default_true", alias = "switch")]
    pub enabled: bool,

    #[serde(default = "default_instances", alias = "workers")]
    pub instances: usize,

    pub port: u16,
}

fn default_instances() -> usize {
    1
}

/// `{kind}_{instance}`, the name of one worker instance everywhere it is reported
pub fn instance_name(kind: &str, instance: usize) -> String {
    format!("{kind}_{instance}")
}

/// A worker kind with its launch parameters, immutable for one supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub kind: String,
    pub enabled: bool,
    pub instances: usize,
    pub port: u16,
}

impl WorkerSpec {
    pub fn new(kind: impl Into<String>, instances: usize, port: u16) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            instances,
            port,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Handle name of one instance, e.g. `repo_collector_0`
    pub fn instance_name(&self, instance: usize) -> String {
        instance_name(&self.kind, instance)
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| FleetError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| FleetError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the default config file path (~/.config/augur/augur.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("augur")
            .join(LOCAL_CONFIG_FILE)
    }

    /// Find and load the config.
    ///
    /// An explicit path must exist. Otherwise `./augur.toml` wins over the
    /// default path, and built-in defaults are used when neither exists.
    /// Returns the path the config came from, if any.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        for candidate in [PathBuf::from(LOCAL_CONFIG_FILE), Self::default_path()] {
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok((config, Some(candidate)));
            }
        }

        Ok((Self::default(), None))
    }

    /// All configured worker kinds, enabled or not, in name order
    pub fn worker_specs(&self) -> Vec<WorkerSpec> {
        self.workers
            .iter()
            .map(|(kind, entry)| WorkerSpec {
                kind: kind.clone(),
                enabled: entry.enabled,
                instances: entry.instances,
                port: entry.port,
            })
            .collect()
    }
}
