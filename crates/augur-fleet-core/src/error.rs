// ABOUTME: Error types for the augur fleet supervisor using thiserror.
// ABOUTME: Covers environment checks, config loading, process launch and broker failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the fleet supervisor and its components.
#[derive(Error, Debug)]
pub enum FleetError {
    /// The supervisor was started outside a virtual environment.
    #[error("augur must be installed and run inside a virtual environment (VIRTUAL_ENV is not set)")]
    NotInVirtualEnv,

    /// Failed to read a config file from disk.
    #[error("failed to read config from {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a config file.
    #[error("failed to parse config from {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The OS process table could not be enumerated at all.
    #[error("failed to scan the process table: {0}")]
    ProcessScan(String),

    /// A worker process could not be started.
    #[error("failed to launch worker {name}: {source}")]
    WorkerLaunch {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The front-end server command could not be started.
    #[error("failed to launch front-end server `{command}`: {source}")]
    ServerLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Broker socket I/O failed.
    #[error("broker I/O error on {path}: {source}")]
    BrokerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The broker answered with an error or an unreadable reply.
    #[error("broker error: {0}")]
    Broker(String),

    /// A second shutdown sequence was registered in the same process.
    #[error("a shutdown sequence is already registered for this process")]
    ShutdownAlreadyRegistered,
}

/// Result type alias using FleetError.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_not_in_virtual_env_display() {
        let display = FleetError::NotInVirtualEnv.to_string();
        assert!(display.contains("virtual environment"));
        assert!(display.contains("VIRTUAL_ENV"));
    }

    #[test]
    fn test_config_read_error_display() {
        let err = FleetError::ConfigRead {
            path: PathBuf::from("/etc/augur.toml"),
            source: io::Error::new(io::ErrorKind::NotFound, "file not found"),
        };
        let display = err.to_string();
        assert!(display.contains("failed to read config"));
        assert!(display.contains("/etc/augur.toml"));
    }

    #[test]
    fn test_worker_launch_error_display() {
        let err = FleetError::WorkerLaunch {
            name: "repo_collector_1".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let display = err.to_string();
        assert!(display.contains("repo_collector_1"));
        assert!(display.contains("denied"));
    }

    #[test]
    fn test_server_launch_error_display() {
        let err = FleetError::ServerLaunch {
            command: "gunicorn".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("`gunicorn`"));
    }

    #[test]
    fn test_error_source_is_preserved() {
        use std::error::Error as _;
        let err = FleetError::BrokerIo {
            path: PathBuf::from("/tmp/augur.sock"),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.source().is_some());
    }
}
