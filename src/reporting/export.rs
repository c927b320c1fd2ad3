//! Report Export
//!
//! Aggregates a finished run into per-metric statistics and writes the
//! result as JSON and/or CSV.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ExportFormat};
use crate::error::ExportError;
use crate::execution::state::{MonitorRun, RunState};
use crate::monitoring::{Metric, Sample};

/// Aggregate statistics of one metric over a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p95: f64,
}

impl MetricSummary {
    /// Summarizes `values`; an empty slice yields all zeros.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let sum: f64 = values.iter().sum();
        Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: sum / values.len() as f64,
            p95: percentile(&sorted, 95.0),
        }
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Computes the summary of every enabled metric, keyed by metric name.
pub fn summarize(samples: &[Sample], monitor_network: bool) -> BTreeMap<String, MetricSummary> {
    Metric::enabled(monitor_network)
        .into_iter()
        .map(|metric| {
            let values: Vec<f64> = samples.iter().map(|s| metric.value(s)).collect();
            (metric.name().to_string(), MetricSummary::from_values(&values))
        })
        .collect()
}

/// Serializable report of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub command: Vec<String>,
    pub state: RunState,
    /// True when the run was interrupted and the series is incomplete
    pub partial: bool,
    /// True when the run was stopped by the user
    pub interrupted: bool,
    pub exit_code: Option<i32>,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    pub duration_seconds: f64,
    pub sampling_interval: f64,
    pub network_monitored: bool,
    pub summary: BTreeMap<String, MetricSummary>,
    pub samples: Vec<Sample>,
}

impl RunReport {
    /// Builds the report of a run that reached a terminal state.
    pub fn from_run(run: &MonitorRun) -> Self {
        let samples = run.series.samples().to_vec();
        let monitor_network = run.config.monitor_network;

        Self {
            command: run.command.clone(),
            state: run.state(),
            partial: run.partial,
            interrupted: run.partial,
            exit_code: run.exit_code,
            start_time: run.start_time,
            end_time: run.end_time,
            duration_seconds: run.elapsed().as_secs_f64(),
            sampling_interval: run.config.sampling_interval,
            network_monitored: monitor_network,
            summary: summarize(&samples, monitor_network),
            samples,
        }
    }

    /// Metric columns present in this report.
    pub fn metrics(&self) -> Vec<Metric> {
        Metric::enabled(self.network_monitored)
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Renders the samples as CSV: a header then one row per sample.
    pub fn to_csv(&self) -> String {
        let metrics = self.metrics();
        let mut out = String::from("timestamp");
        for metric in &metrics {
            out.push(',');
            out.push_str(metric.name());
        }
        out.push('\n');

        for sample in &self.samples {
            // Writing into a String cannot fail.
            let _ = write!(out, "{}", sample.timestamp);
            for metric in &metrics {
                out.push(',');
                out.push_str(&metric.format_value(sample));
            }
            out.push('\n');
        }
        out
    }
}

/// Writes reports in the configured formats.
pub struct ReportExporter<'a> {
    config: &'a Config,
}

impl<'a> ReportExporter<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Writes every configured format, attempting each one even if an
    /// earlier one failed. Returns the written paths and the failures.
    pub fn export(&self, report: &RunReport) -> (Vec<PathBuf>, Vec<ExportError>) {
        let mut written = Vec::new();
        let mut errors = Vec::new();

        for format in &self.config.export_formats {
            let path = self.config.report_path(*format);
            match self.write_format(report, *format, &path) {
                Ok(()) => {
                    info!("Wrote {} report to {}", format, path.display());
                    written.push(path);
                }
                Err(e) => {
                    warn!("{}", e);
                    errors.push(e);
                }
            }
        }

        (written, errors)
    }

    fn write_format(
        &self,
        report: &RunReport,
        format: ExportFormat,
        path: &Path,
    ) -> Result<(), ExportError> {
        let content = match format {
            ExportFormat::Json => report.to_json()?,
            ExportFormat::Csv => report.to_csv(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| ExportError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        fs::write(path, content).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
