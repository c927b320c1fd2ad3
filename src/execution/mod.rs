//! Run Execution Module
//!
//! Launches the monitored command and drives a run through its lifecycle.
//!
//! # Architecture
//!
//! - [`engine`]: Orchestrates launching, sampling and reporting
//! - [`launcher`]: Starts and stops the child process
//! - [`state`]: Run record and its state machine

pub mod engine;
pub mod launcher;
pub mod state;

pub use engine::{format_summary, Monitor, RunOutcome};
pub use launcher::{LaunchedProcess, ProcessLauncher};
pub use state::{MonitorRun, RunState};
