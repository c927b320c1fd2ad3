//! Process Launching
//!
//! Spawns the monitored command with inherited standard streams and keeps
//! the handle needed to poll, wait for and terminate it.

use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::LaunchError;

/// How often a bounded wait polls the child.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Spawns monitored commands.
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Spawns `command` (program followed by its arguments).
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the command is empty, the program
    /// cannot be found or it may not be executed.
    pub fn launch(command: &[String]) -> Result<LaunchedProcess, LaunchError> {
        let (program, args) = command.split_first().ok_or(LaunchError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| LaunchError::from_spawn(program, e))?;

        let started_at = Instant::now();
        let pid = child.id();
        info!("Started '{}' (pid {})", command.join(" "), pid);

        Ok(LaunchedProcess {
            child: Mutex::new(child),
            exit_code: Mutex::new(None),
            pid,
            started_at,
        })
    }
}

/// A running (or finished) monitored process.
#[derive(Debug)]
pub struct LaunchedProcess {
    child: Mutex<Child>,
    exit_code: Mutex<Option<i32>>,
    pid: u32,
    started_at: Instant,
}

impl LaunchedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Monotonic instant right after the spawn succeeded.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the exit code if the process has exited, without blocking.
    pub fn try_exit_code(&self) -> Option<i32> {
        let mut exit_code = self.exit_code.lock().unwrap_or_else(|e| e.into_inner());
        if exit_code.is_some() {
            return *exit_code;
        }

        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = exit_code_of(status);
                debug!("Process {} exited with code {}", self.pid, code);
                *exit_code = Some(code);
                Some(code)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to poll process {}: {}", self.pid, e);
                None
            }
        }
    }

    /// Waits up to `grace` for the process to exit on its own, then
    /// terminates it. Always returns an exit code.
    pub fn wait_bounded(&self, grace: Duration) -> i32 {
        if let Some(code) = self.poll_until(Instant::now() + grace) {
            return code;
        }
        warn!(
            "Process {} still running after {:.1?}; terminating",
            self.pid, grace
        );
        self.terminate(grace)
    }

    /// Asks the process to stop (SIGTERM), escalating to a kill if it is
    /// still alive after `grace`. Returns its exit code.
    pub fn terminate(&self, grace: Duration) -> i32 {
        if let Some(code) = self.try_exit_code() {
            return code;
        }

        self.send_terminate();
        if let Some(code) = self.poll_until(Instant::now() + grace) {
            return code;
        }

        warn!("Process {} ignored termination request; killing", self.pid);
        // Lock order matches try_exit_code: exit code first, then child.
        let mut exit_code = self.exit_code.lock().unwrap_or_else(|e| e.into_inner());
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = child.kill() {
            warn!("Failed to kill process {}: {}", self.pid, e);
        }
        let code = match child.wait() {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!("Failed to reap process {}: {}", self.pid, e);
                -1
            }
        };
        *exit_code = Some(code);
        code
    }

    fn poll_until(&self, deadline: Instant) -> Option<i32> {
        loop {
            if let Some(code) = self.try_exit_code() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(WAIT_POLL);
        }
    }

    #[cfg(unix)]
    fn send_terminate(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        info!("Sending SIGTERM to process {}", self.pid);
        if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to process {}: {}", self.pid, e);
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&self) {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = child.kill() {
            warn!("Failed to stop process {}: {}", self.pid, e);
        }
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
