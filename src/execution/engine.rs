//! Monitoring Engine
//!
//! Orchestrates one monitoring run:
//! - Launches the command
//! - Samples it on a background thread until it exits or is interrupted
//! - Optionally shows live metrics
//! - Writes reports and charts over the collected series

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use colored::Colorize;
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ExportError, MonitorError};
use crate::monitoring::{
    CancelToken, MetricSource, Sampler, SamplerReport, StopReason, SystemMetricSource,
    TimeSeriesStore,
};
use crate::reporting::{LiveSink, LiveView, PlotRenderer, ReportExporter, RunReport, TerminalSink};

use super::launcher::ProcessLauncher;
use super::state::{MonitorRun, RunState};

/// Time a process gets to exit on its own, or after SIGTERM, before it is
/// killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Result of a run that got past launching.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: MonitorRun,
    pub sampler: Option<SamplerReport>,
    /// Report files written
    pub reports: Vec<std::path::PathBuf>,
    /// Report files that could not be written
    pub export_errors: Vec<ExportError>,
    /// Rendered charts, when plotting was enabled and succeeded
    pub plots: Option<String>,
}

impl RunOutcome {
    pub fn was_interrupted(&self) -> bool {
        self.run.partial
    }
}

type SourceFactory = Box<dyn Fn(&Config) -> Box<dyn MetricSource> + Send>;
type SinkFactory = Box<dyn Fn() -> Box<dyn LiveSink> + Send>;

/// Monitoring engine.
///
/// # Example
///
/// ```rust,no_run
/// use perfmon::config::Config;
/// use perfmon::execution::Monitor;
/// use perfmon::monitoring::CancelToken;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let monitor = Monitor::new(Config::default());
///     let command = vec!["sleep".to_string(), "2".to_string()];
///     let outcome = monitor.run(&command, &CancelToken::new())?;
///     println!("{} samples", outcome.run.series.len());
///     Ok(())
/// }
/// ```
pub struct Monitor {
    config: Config,
    source_factory: SourceFactory,
    sink_factory: SinkFactory,
    print_plots: bool,
}

impl Monitor {
    /// Creates an engine measuring real processes and drawing to the
    /// terminal.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source_factory: Box::new(|config: &Config| {
                Box::new(SystemMetricSource::new(config.monitor_network)) as Box<dyn MetricSource>
            }),
            sink_factory: Box::new(|| Box::new(TerminalSink::stderr()) as Box<dyn LiveSink>),
            print_plots: true,
        }
    }

    /// Replaces the counter source.
    pub fn with_source<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Config) -> Box<dyn MetricSource> + Send + 'static,
    {
        self.source_factory = Box::new(factory);
        self
    }

    /// Replaces the live view output.
    pub fn with_live_sink<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn LiveSink> + Send + 'static,
    {
        self.sink_factory = Box::new(factory);
        self
    }

    /// Controls whether charts are printed to stdout (they are always
    /// returned in the outcome).
    pub fn set_print_plots(&mut self, print: bool) {
        self.print_plots = print;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Monitors `command` until it exits or `cancel` fires.
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome)` - The command ran; reports were attempted
    /// * `Err(MonitorError::Config)` - The configuration is out of range
    /// * `Err(MonitorError::Launch)` - The command could not be started
    pub fn run(&self, command: &[String], cancel: &CancelToken) -> Result<RunOutcome, MonitorError> {
        self.config.validate()?;
        let mut run = MonitorRun::new(command, self.config.clone());

        let process = match ProcessLauncher::launch(command) {
            Ok(process) => Arc::new(process),
            Err(e) => {
                error!("{}", e);
                run.fail(e.to_string(), None, Default::default())?;
                info!("Run {}: no report written", run.state());
                return Err(e.into());
            }
        };

        run.start(process.pid(), process.started_at())?;
        info!(
            "Monitoring pid {} every {:.3}s",
            process.pid(),
            self.config.sampling_interval
        );

        let store = Arc::new(TimeSeriesStore::new());

        let live_view = if self.config.show_live_metrics {
            match LiveView::spawn(Arc::clone(&store), (self.sink_factory)(), self.config.interval()) {
                Ok(view) => Some(view),
                Err(e) => {
                    warn!("Live view unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let sampler = Sampler::new((self.source_factory)(&self.config), self.config.interval());
        debug!("Measurement budget per tick: {:?}", sampler.measure_timeout());
        let sampler_result = {
            let process = Arc::clone(&process);
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("perfmon-sampler".to_string())
                .spawn(move || sampler.run(&*process, &store, &cancel))
                .map_err(|e| e.to_string())
                .and_then(|handle| handle.join().map_err(|_| "sampler thread panicked".to_string()))
        };

        if let Some(view) = live_view {
            view.stop();
        }

        let series = store.freeze();
        let sampler_report = match sampler_result {
            Ok(mut report) => {
                // A terminal interrupt can kill the child before the sampler
                // sees the cancel request.
                if report.stop_reason == StopReason::ProcessExited && cancel.is_cancelled() {
                    report.stop_reason = StopReason::Cancelled;
                }
                match report.stop_reason {
                    StopReason::Cancelled => {
                        warn!("Monitoring interrupted by user");
                        run.interrupt()?;
                        let exit_code = process.terminate(SHUTDOWN_GRACE);
                        run.complete(exit_code, series)?;
                    }
                    StopReason::ProcessExited => {
                        let exit_code = process.wait_bounded(SHUTDOWN_GRACE);
                        run.complete(exit_code, series)?;
                    }
                    StopReason::SourceFailed => {
                        error!("Monitoring failed: metric source stopped responding");
                        let exit_code = process.terminate(SHUTDOWN_GRACE);
                        run.fail("metric source stopped responding", Some(exit_code), series)?;
                    }
                }
                Some(report)
            }
            Err(reason) => {
                error!("Monitoring failed: {}", reason);
                let exit_code = process.terminate(SHUTDOWN_GRACE);
                run.fail(reason, Some(exit_code), series)?;
                None
            }
        };

        info!(
            "Run {}{} after {:.2?} with {} samples (exit code {})",
            run.state(),
            if run.partial { " (partial)" } else { "" },
            run.elapsed(),
            run.series.len(),
            run.exit_code.map_or("unknown".to_string(), |c| c.to_string())
        );

        Ok(self.finalize(run, sampler_report))
    }

    /// Writes reports and charts for a run in a terminal state.
    fn finalize(&self, run: MonitorRun, sampler: Option<SamplerReport>) -> RunOutcome {
        debug_assert!(run.state().is_terminal());

        let report = RunReport::from_run(&run);
        let (reports, export_errors) = ReportExporter::new(&self.config).export(&report);

        let plots = if self.config.create_plots {
            let renderer = PlotRenderer::new(
                crate::reporting::plot::terminal_width(),
                self.config.plot_height,
            );
            match renderer.render(&run.series) {
                Ok(chart) => {
                    if self.print_plots {
                        println!("{}", chart);
                    }
                    Some(chart)
                }
                Err(e) => {
                    warn!("Skipping charts: {}", e);
                    None
                }
            }
        } else {
            None
        };

        RunOutcome {
            run,
            sampler,
            reports,
            export_errors,
            plots,
        }
    }
}

/// Formats the end-of-run summary shown to the user.
pub fn format_summary(outcome: &RunOutcome) -> String {
    let run = &outcome.run;
    let report = RunReport::from_run(run);

    let state = match run.state() {
        RunState::Completed if run.partial => "INTERRUPTED (partial)".yellow().bold(),
        RunState::Completed => "COMPLETED".green().bold(),
        other => other.as_str().to_uppercase().red().bold(),
    };

    let mut out = format!(
        "Run {}\n  Command: {}\n  Duration: {:.2?}\n  Exit code: {}\n  Samples: {}\n",
        state,
        run.command.join(" "),
        run.elapsed(),
        run.exit_code.map_or("unknown".to_string(), |c| c.to_string()),
        run.series.len()
    );

    if let Some(cpu) = report.summary.get("cpu_percent") {
        out.push_str(&format!(
            "  CPU: avg {:.1}%  max {:.1}%  p95 {:.1}%\n",
            cpu.mean, cpu.max, cpu.p95
        ));
    }
    if let Some(mem) = report.summary.get("mem_rss_bytes") {
        out.push_str(&format!(
            "  Memory: avg {}  max {}\n",
            crate::reporting::live::format_bytes(mem.mean as u64),
            crate::reporting::live::format_bytes(mem.max as u64)
        ));
    }
    for path in &outcome.reports {
        out.push_str(&format!("  Report: {}\n", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportFormat;
    use crate::error::SamplingError;
    use crate::monitoring::Measurement;
    use crate::reporting::export::summarize;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tempfile::tempdir;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn quiet_config(dir: &std::path::Path, interval: f64) -> Config {
        Config {
            sampling_interval: interval,
            monitor_network: false,
            export_formats: BTreeSet::from([ExportFormat::Json, ExportFormat::Csv]),
            show_live_metrics: false,
            create_plots: false,
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    /// Counts measurements and cancels the run on the n-th one.
    struct CancellingSource {
        calls: Arc<AtomicUsize>,
        cancel_on: usize,
        cancel: CancelToken,
    }

    impl MetricSource for CancellingSource {
        fn measure(&mut self, _pid: u32) -> Result<Measurement, SamplingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.cancel_on {
                self.cancel.cancel();
            }
            Ok(Measurement {
                cpu_percent: call as f64,
                mem_rss_bytes: 4096,
                process_count: 1,
                ..Default::default()
            })
        }
    }

    /// Cancels the run and reports the process gone on the n-th
    /// measurement, like a Ctrl-C that also reached the child.
    struct VanishOnCancelSource {
        calls: usize,
        cancel_on: usize,
        cancel: CancelToken,
    }

    impl MetricSource for VanishOnCancelSource {
        fn measure(&mut self, pid: u32) -> Result<Measurement, SamplingError> {
            self.calls += 1;
            if self.calls == self.cancel_on {
                self.cancel.cancel();
                return Err(SamplingError::ProcessVanished { pid });
            }
            Ok(Measurement {
                process_count: 1,
                thread_count: 1,
                ..Default::default()
            })
        }
    }

    /// Panics on the first measurement.
    struct PanickingSource;

    impl MetricSource for PanickingSource {
        fn measure(&mut self, _pid: u32) -> Result<Measurement, SamplingError> {
            panic!("counter read exploded");
        }
    }

    #[test]
    fn test_monitor_creation() {
        let monitor = Monitor::new(Config::default());
        assert_eq!(monitor.config().sampling_interval, 1.0);
        assert!(monitor.print_plots);
    }

    #[test]
    fn test_sleep_scenario() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(quiet_config(dir.path(), 0.5));

        let started = Instant::now();
        let outcome = monitor.run(&cmd(&["sleep", "2"]), &CancelToken::new()).unwrap();
        let elapsed = started.elapsed().as_secs_f64();

        assert_eq!(outcome.run.state(), RunState::Completed);
        assert!(!outcome.was_interrupted());
        assert_eq!(outcome.run.exit_code, Some(0));

        let samples = outcome.run.series.len();
        let expected = elapsed / 0.5;
        assert!(
            (samples as f64 - expected).abs() <= 1.5,
            "{} samples over {:.2}s",
            samples,
            elapsed
        );

        let json = fs::read_to_string(dir.path().join("perfmon_results.json")).unwrap();
        let report: RunReport = serde_json::from_str(&json).unwrap();
        assert!(report.summary.contains_key("cpu_percent"));
        assert_eq!(report.samples.len(), samples);
        assert_eq!(summarize(&report.samples, false), report.summary);

        let csv = fs::read_to_string(dir.path().join("perfmon_results.csv")).unwrap();
        assert_eq!(csv.lines().count(), samples + 1);

        for sample in outcome.run.series.samples() {
            assert!(sample.cpu_percent >= 0.0);
            assert!(sample.cpu_percent <= crate::monitoring::resource::max_cpu_percent());
        }
    }

    #[test]
    fn test_quick_exit_produces_valid_report() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(quiet_config(dir.path(), 1.0));

        let outcome = monitor.run(&cmd(&["true"]), &CancelToken::new()).unwrap();

        assert_eq!(outcome.run.state(), RunState::Completed);
        assert!(outcome.run.series.len() <= 1);
        assert!(outcome.export_errors.is_empty());
        assert!(dir.path().join("perfmon_results.json").exists());
    }

    #[test]
    fn test_exit_code_is_mirrored() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(quiet_config(dir.path(), 0.2));

        let outcome = monitor
            .run(&cmd(&["sh", "-c", "sleep 0.3; exit 3"]), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.run.exit_code, Some(3));
    }

    #[test]
    fn test_launch_error_writes_nothing() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(quiet_config(dir.path(), 0.2));

        let result = monitor.run(&cmd(&["perfmon-no-such-binary"]), &CancelToken::new());

        assert!(matches!(result, Err(MonitorError::Launch(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_interrupt_after_three_samples() {
        let dir = tempdir().unwrap();
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let source_cancel = cancel.clone();
        let source_calls = Arc::clone(&calls);
        let monitor = Monitor::new(quiet_config(dir.path(), 0.1)).with_source(move |_| {
            Box::new(CancellingSource {
                calls: Arc::clone(&source_calls),
                cancel_on: 3,
                cancel: source_cancel.clone(),
            }) as Box<dyn MetricSource>
        });

        let outcome = monitor.run(&cmd(&["sleep", "30"]), &cancel).unwrap();

        assert!(outcome.was_interrupted());
        assert_eq!(outcome.run.state(), RunState::Completed);
        assert_eq!(outcome.run.series.len(), 3);
        assert!(outcome.run.elapsed() < Duration::from_secs(10));

        let json = fs::read_to_string(dir.path().join("perfmon_results.json")).unwrap();
        let report: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report.samples.len(), 3);
        assert!(report.partial);
        assert!(report.interrupted);
    }

    #[test]
    fn test_interrupt_that_kills_child_is_partial() {
        let dir = tempdir().unwrap();
        let cancel = CancelToken::new();
        let source_cancel = cancel.clone();
        let monitor = Monitor::new(quiet_config(dir.path(), 0.05)).with_source(move |_| {
            Box::new(VanishOnCancelSource {
                calls: 0,
                cancel_on: 3,
                cancel: source_cancel.clone(),
            }) as Box<dyn MetricSource>
        });

        let outcome = monitor.run(&cmd(&["sleep", "30"]), &cancel).unwrap();

        assert!(outcome.was_interrupted());
        assert_eq!(outcome.run.state(), RunState::Completed);
        assert_eq!(outcome.run.series.len(), 2);
    }

    #[test]
    fn test_out_of_range_interval_is_rejected_before_launch() {
        let dir = tempdir().unwrap();
        for interval in [1e-10, 1e20] {
            let monitor = Monitor::new(quiet_config(dir.path(), interval));
            let result = monitor.run(&cmd(&["sleep", "0.5"]), &CancelToken::new());
            assert!(matches!(result, Err(MonitorError::Config(_))), "interval {}", interval);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sampler_panic_fails_run_but_reports() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(quiet_config(dir.path(), 0.1))
            .with_source(|_| Box::new(PanickingSource) as Box<dyn MetricSource>);

        let outcome = monitor.run(&cmd(&["sleep", "30"]), &CancelToken::new()).unwrap();

        // The measurement worker dies, so the sampler stops without samples.
        assert_eq!(outcome.run.state(), RunState::Failed);
        assert!(outcome.run.failure.is_some());
        assert!(outcome.run.series.is_empty());
        assert!(outcome.run.exit_code.is_some());
        assert!(dir.path().join("perfmon_results.json").exists());
    }

    #[test]
    fn test_plots_rendered_when_enabled() {
        let dir = tempdir().unwrap();
        let mut config = quiet_config(dir.path(), 0.1);
        config.create_plots = true;

        let mut monitor = Monitor::new(config);
        monitor.set_print_plots(false);
        let outcome = monitor.run(&cmd(&["sleep", "0.5"]), &CancelToken::new()).unwrap();

        let plots = outcome.plots.unwrap();
        assert!(plots.contains("CPU Usage Over Time"));
        assert!(plots.contains("Memory Usage Over Time"));
    }

    #[test]
    fn test_summary_text() {
        colored::control::set_override(false);
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(quiet_config(dir.path(), 0.1));
        let outcome = monitor.run(&cmd(&["sleep", "0.3"]), &CancelToken::new()).unwrap();

        let summary = format_summary(&outcome);
        assert!(summary.contains("COMPLETED"));
        assert!(summary.contains("Command: sleep 0.3"));
        assert!(summary.contains("perfmon_results.json"));
    }
}
