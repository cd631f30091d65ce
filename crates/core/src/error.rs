//! Error types for staging, spawning and configuration
//!
//! Termination and cleanup have no error type: termination always completes
//! and cleanup failures are only logged.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::supervisor::SupervisorState;

/// Failure to materialize the embedded service binary on disk
#[derive(Debug, Error)]
pub enum StagingError {
    /// The launcher was built without a service binary
    #[error("embedded service binary is missing from this build")]
    ResourceMissing,

    /// Fewer bytes landed on disk than the blob holds
    #[error("staged binary at {path:?} is incomplete: wrote {written} of {expected} bytes")]
    Incomplete {
        path: PathBuf,
        expected: u64,
        written: u64,
    },

    #[error("failed to stage service binary at {path:?}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StagingError {
    pub fn os_code(&self) -> Option<i32> {
        match self {
            StagingError::IoFailure { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Failure to start (or restart into) a service instance
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to spawn {path:?}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Operation requested from a state that does not allow it
    #[error("supervisor cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SupervisorState,
    },

    #[error("port {0} is outside 1-65535")]
    InvalidPort(u32),

    /// The instance died on its own before the operation could replace it
    #[error("service already exited with code {code:?}")]
    AlreadyExited { code: Option<i32> },
}

impl StartError {
    pub fn os_code(&self) -> Option<i32> {
        match self {
            StartError::SpawnFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine user config directory")]
    NoConfigDirectory,

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
