//! Run Configuration
//!
//! Resolves the effective [`Config`] for a monitoring run by layering
//! built-in defaults, an optional YAML config file and command-line
//! overrides. The result is immutable and handed to each component.
//!
//! # File Format
//!
//! ```yaml
//! sampling_interval: 0.5
//! monitor_network: false
//! export_formats: [json, csv]
//! show_live_metrics: true
//! create_plots: true
//! output_dir: reports
//! ```
//!
//! Keys may be omitted; missing keys keep their defaults.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default seconds between samples.
pub const DEFAULT_SAMPLING_INTERVAL: f64 = 1.0;

/// Shortest accepted sampling interval in seconds.
pub const MIN_SAMPLING_INTERVAL: f64 = 0.01;

/// Longest accepted sampling interval in seconds (one day).
pub const MAX_SAMPLING_INTERVAL: f64 = 86_400.0;

/// Default stem for report files.
pub const DEFAULT_OUTPUT_PREFIX: &str = "perfmon_results";

/// Default number of rows per terminal chart.
pub const DEFAULT_PLOT_HEIGHT: usize = 12;

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// File extension used for this format.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Effective configuration of a monitoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between samples (> 0)
    pub sampling_interval: f64,
    /// Record host network counters alongside process metrics
    pub monitor_network: bool,
    /// Report formats written when the run ends
    pub export_formats: BTreeSet<ExportFormat>,
    /// Render the latest sample while the command runs
    pub show_live_metrics: bool,
    /// Print CPU and memory charts when the run ends
    pub create_plots: bool,
    /// Directory receiving report files
    pub output_dir: PathBuf,
    /// File stem of report files
    pub output_prefix: String,
    /// Rows per terminal chart
    pub plot_height: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            monitor_network: true,
            export_formats: BTreeSet::from([ExportFormat::Json]),
            show_live_metrics: true,
            create_plots: true,
            output_dir: PathBuf::from("."),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            plot_height: DEFAULT_PLOT_HEIGHT,
        }
    }
}

/// Values supplied on the command line. `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub sampling_interval: Option<f64>,
    pub export_formats: Option<Vec<ExportFormat>>,
    pub output_dir: Option<PathBuf>,
    pub no_live: bool,
    pub no_plots: bool,
    pub no_network: bool,
}

impl Config {
    /// Sampling interval as a [`Duration`].
    ///
    /// Out-of-range values are clamped to the accepted range and values
    /// that are not a number fall back to the default, so this never
    /// panics on an unvalidated config.
    pub fn interval(&self) -> Duration {
        let seconds = self
            .sampling_interval
            .clamp(MIN_SAMPLING_INTERVAL, MAX_SAMPLING_INTERVAL);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_SAMPLING_INTERVAL))
    }

    /// Full path of the report file for a format.
    pub fn report_path(&self, format: ExportFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.output_prefix, format.extension()))
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.sampling_interval;
        if !(MIN_SAMPLING_INTERVAL..=MAX_SAMPLING_INTERVAL).contains(&interval)
            || Duration::try_from_secs_f64(interval).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "sampling_interval must be between {} and {} seconds, got {}",
                MIN_SAMPLING_INTERVAL, MAX_SAMPLING_INTERVAL, interval
            )));
        }
        if self.export_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "export_formats must name at least one of: json, csv".to_string(),
            ));
        }
        if self.output_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("output_prefix must not be empty".to_string()));
        }
        if self.plot_height < 2 {
            return Err(ConfigError::Invalid(format!(
                "plot_height must be at least 2 rows, got {}",
                self.plot_height
            )));
        }
        Ok(())
    }

    /// Applies command-line overrides on top of this configuration.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(interval) = overrides.sampling_interval {
            self.sampling_interval = interval;
        }
        if let Some(ref formats) = overrides.export_formats {
            self.export_formats = formats.iter().copied().collect();
        }
        if let Some(ref dir) = overrides.output_dir {
            self.output_dir = dir.clone();
        }
        if overrides.no_live {
            self.show_live_metrics = false;
        }
        if overrides.no_plots {
            self.create_plots = false;
        }
        if overrides.no_network {
            self.monitor_network = false;
        }
        self
    }
}

/// Loads a config file, layering its keys over the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Config content loaded ({} bytes)", content.len());

    // An empty file is a valid "all defaults" config.
    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the effective configuration.
///
/// A config file that cannot be read or parsed is reported as a warning and
/// the defaults are used instead. Values that are out of range after
/// applying overrides are an error.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<Config, ConfigError> {
    let base = match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{}", e);
                warn!("Using default configuration");
                Config::default()
            }
        },
        None => Config::default(),
    };

    let config = base.with_overrides(overrides);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sampling_interval, 1.0);
        assert!(config.monitor_network);
        assert!(config.show_live_metrics);
        assert!(config.create_plots);
        assert_eq!(config.export_formats.len(), 1);
        assert!(config.export_formats.contains(&ExportFormat::Json));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perfmon.yaml");
        fs::write(
            &path,
            "sampling_interval: 0.25\nexport_formats: [json, csv]\ncreate_plots: false\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.sampling_interval, 0.25);
        assert!(config.export_formats.contains(&ExportFormat::Csv));
        assert!(!config.create_plots);
        // untouched keys keep defaults
        assert!(config.monitor_network);
        assert_eq!(config.output_prefix, DEFAULT_OUTPUT_PREFIX);
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        fs::write(&path, "").unwrap();

        assert_eq!(load_config(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "sampling_interval: [not, a, number]").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/nonexistent/perfmon.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let config = resolve_config(
            Some(Path::new("/nonexistent/perfmon.yaml")),
            &ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perfmon.yaml");
        fs::write(&path, "sampling_interval: 2.0\nshow_live_metrics: true\n").unwrap();

        let overrides = ConfigOverrides {
            sampling_interval: Some(0.5),
            export_formats: Some(vec![ExportFormat::Csv]),
            no_live: true,
            no_network: true,
            ..Default::default()
        };

        let config = resolve_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.sampling_interval, 0.5);
        assert!(!config.show_live_metrics);
        assert!(!config.monitor_network);
        assert_eq!(config.export_formats, BTreeSet::from([ExportFormat::Csv]));
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        for interval in [0.0, -1.0, f64::NAN] {
            let overrides = ConfigOverrides {
                sampling_interval: Some(interval),
                ..Default::default()
            };
            let result = resolve_config(None, &overrides);
            assert!(matches!(result, Err(ConfigError::Invalid(_))), "interval {}", interval);
        }
    }

    #[test]
    fn test_rejects_interval_outside_range() {
        for interval in [1e-10, 0.001, 86_401.0, 1e20, f64::INFINITY] {
            let overrides = ConfigOverrides {
                sampling_interval: Some(interval),
                ..Default::default()
            };
            let result = resolve_config(None, &overrides);
            assert!(matches!(result, Err(ConfigError::Invalid(_))), "interval {}", interval);
        }
    }

    #[test]
    fn test_accepts_interval_range_edges() {
        for interval in [MIN_SAMPLING_INTERVAL, MAX_SAMPLING_INTERVAL] {
            let config = Config {
                sampling_interval: interval,
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "interval {}", interval);
        }
    }

    #[test]
    fn test_interval_never_panics() {
        for (interval, expected) in [
            (1e-10, Duration::from_millis(10)),
            (1e20, Duration::from_secs(86_400)),
            (f64::NAN, Duration::from_secs(1)),
        ] {
            let config = Config {
                sampling_interval: interval,
                ..Default::default()
            };
            assert_eq!(config.interval(), expected, "interval {}", interval);
        }
    }

    #[test]
    fn test_rejects_empty_formats() {
        let overrides = ConfigOverrides {
            export_formats: Some(vec![]),
            ..Default::default()
        };
        assert!(resolve_config(None, &overrides).is_err());
    }

    #[test]
    fn test_report_path() {
        let config = Config {
            output_dir: PathBuf::from("/tmp/out"),
            ..Default::default()
        };
        assert_eq!(
            config.report_path(ExportFormat::Csv),
            PathBuf::from("/tmp/out/perfmon_results.csv")
        );
    }

    #[test]
    fn test_interval_duration() {
        let config = Config {
            sampling_interval: 0.5,
            ..Default::default()
        };
        assert_eq!(config.interval(), Duration::from_millis(500));
    }
}
