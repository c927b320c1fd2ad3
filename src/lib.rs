//! perfmon - Command Resource Monitor
//!
//! Runs a command, samples the CPU, memory, disk and network usage of its
//! whole process tree at a fixed interval, and writes a report with
//! per-metric statistics once the command exits or the user interrupts it.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`config`]: Run configuration and YAML config files
//! - [`error`]: Error types for every stage of a run
//! - [`execution`]: Process launching, run lifecycle and orchestration
//! - [`monitoring`]: Resource measurement, sampling loop and sample store
//! - [`reporting`]: Live view, JSON/CSV export and terminal charts
//!
//! # Example
//!
//! ```rust,no_run
//! use perfmon::config::Config;
//! use perfmon::execution::Monitor;
//! use perfmon::monitoring::CancelToken;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.sampling_interval = 0.5;
//!
//!     let monitor = Monitor::new(config);
//!     let command = vec!["sleep".to_string(), "3".to_string()];
//!     let outcome = monitor.run(&command, &CancelToken::new())?;
//!
//!     println!("{}", perfmon::execution::format_summary(&outcome));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod reporting;

// Re-export commonly used types
pub use config::{resolve_config, Config, ExportFormat};
pub use execution::{Monitor, RunOutcome, RunState};
pub use monitoring::{CancelToken, Sample};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "perfmon";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "perfmon");
    }

    #[test]
    fn test_module_exports_config() {
        let config = Config::default();
        assert!(config.export_formats.contains(&ExportFormat::Json));
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
