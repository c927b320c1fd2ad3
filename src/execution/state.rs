//! Run Lifecycle State
//!
//! [`MonitorRun`] records one execution of a monitored command: its
//! configuration, timing, exit code, collected series and lifecycle
//! state.
//!
//! ```text
//! Pending -> Running -> Completed
//!    |          |  \
//!    |          |   -> Interrupted -> Completed (partial)
//!    +----------+-> Failed
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::MonitorError;
use crate::monitoring::TimeSeries;

/// Lifecycle state of a monitoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Child not spawned yet
    Pending,
    /// Child alive and being sampled
    Running,
    /// Stop requested by the user; reports still follow
    Interrupted,
    /// Run finished and its series is frozen
    Completed,
    /// Launch or unrecoverable error
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Interrupted => "interrupted",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a monitored command.
#[derive(Debug, Clone)]
pub struct MonitorRun {
    pub command: Vec<String>,
    pub config: Config,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    pub exit_code: Option<i32>,
    /// Set when the series was cut short by an interrupt
    pub partial: bool,
    pub failure: Option<String>,
    pub series: TimeSeries,
    state: RunState,
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

impl MonitorRun {
    /// Creates a pending run.
    pub fn new(command: &[String], config: Config) -> Self {
        Self {
            command: command.to_vec(),
            config,
            pid: None,
            start_time: None,
            end_time: None,
            exit_code: None,
            partial: false,
            failure: None,
            series: TimeSeries::default(),
            state: RunState::Pending,
            started: None,
            elapsed: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Wall-clock duration of the run; grows while it is still running.
    pub fn elapsed(&self) -> Duration {
        match (self.elapsed, self.started) {
            (Some(elapsed), _) => elapsed,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    fn transition(&mut self, allowed: &[RunState], to: RunState) -> Result<(), MonitorError> {
        if !allowed.contains(&self.state) {
            return Err(MonitorError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// `Pending -> Running` once the child process exists.
    pub fn start(&mut self, pid: u32, started: Instant) -> Result<(), MonitorError> {
        self.transition(&[RunState::Pending], RunState::Running)?;
        self.pid = Some(pid);
        self.started = Some(started);
        self.start_time = Some(Local::now());
        Ok(())
    }

    /// `Running -> Interrupted` on a user stop request.
    pub fn interrupt(&mut self) -> Result<(), MonitorError> {
        self.transition(&[RunState::Running], RunState::Interrupted)?;
        self.partial = true;
        Ok(())
    }

    /// `Running | Interrupted -> Completed`.
    pub fn complete(&mut self, exit_code: i32, series: TimeSeries) -> Result<(), MonitorError> {
        self.transition(&[RunState::Running, RunState::Interrupted], RunState::Completed)?;
        self.finish(Some(exit_code), series);
        Ok(())
    }

    /// `Pending | Running | Interrupted -> Failed`.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        exit_code: Option<i32>,
        series: TimeSeries,
    ) -> Result<(), MonitorError> {
        self.transition(
            &[RunState::Pending, RunState::Running, RunState::Interrupted],
            RunState::Failed,
        )?;
        self.failure = Some(reason.into());
        self.finish(exit_code, series);
        Ok(())
    }

    fn finish(&mut self, exit_code: Option<i32>, series: TimeSeries) {
        self.exit_code = exit_code;
        self.series = series;
        self.elapsed = self.started.map(|started| started.elapsed());
        if self.started.is_some() {
            self.end_time = Some(Local::now());
        }
    }
}
