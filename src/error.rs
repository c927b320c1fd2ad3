//! Error Types
//!
//! One error type per failure class of a monitoring run. Only
//! [`LaunchError`] is fatal; every other class degrades gracefully and
//! keeps the samples collected so far.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::execution::state::RunState;

/// The monitored command could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No program was given.
    #[error("no command given to monitor")]
    EmptyCommand,

    /// The executable does not exist or is not on `PATH`.
    #[error("command not found: '{program}'")]
    NotFound { program: String },

    /// The executable exists but may not be executed.
    #[error("permission denied executing '{program}'")]
    PermissionDenied { program: String },

    /// Any other spawn failure.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Classifies a spawn failure by its I/O error kind.
    pub fn from_spawn(program: &str, source: io::Error) -> Self {
        let program = program.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound { program },
            io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied { program },
            _ => LaunchError::Spawn { program, source },
        }
    }
}

/// A single measurement could not be taken.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplingError {
    /// The monitored process is gone (exited or reaped).
    #[error("process {pid} is no longer running")]
    ProcessVanished { pid: u32 },

    /// The measurement did not finish within its time budget.
    #[error("measurement timed out after {millis} ms")]
    Timeout { millis: u128 },

    /// The measurement worker thread stopped responding.
    #[error("measurement worker is gone")]
    WorkerGone,

    /// Counters could not be read for another reason.
    #[error("failed to read counters: {0}")]
    Unavailable(String),
}

/// A report file could not be written.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write report '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Live view or chart rendering failed.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("terminal write failed: {0}")]
    Io(#[from] io::Error),

    #[error("cannot render chart: {0}")]
    Chart(String),
}

/// Configuration could not be resolved.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error of a monitoring run.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
}
