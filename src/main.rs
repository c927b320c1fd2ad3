//! perfmon CLI Entry Point
//!
//! Runs a command under resource monitoring.
//!
//! # Usage
//!
//! ```bash
//! # Monitor a command with the default settings
//! perfmon -- python train.py --epochs 3
//!
//! # Sample twice a second, write both report formats
//! perfmon --interval 0.5 --format json,csv -- make -j8
//!
//! # Use a config file, no live line and no charts
//! perfmon --config perfmon.yaml --no-live --no-plots -- ./bench
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use log::{debug, error, info, warn};

use perfmon::config::{resolve_config, ConfigOverrides, ExportFormat};
use perfmon::error::MonitorError;
use perfmon::execution::{format_summary, Monitor, RunState};
use perfmon::monitoring::CancelToken;
use perfmon::{APP_NAME, VERSION};

/// Exit status when the configuration is invalid.
const EXIT_CONFIG: u8 = 2;

/// Exit status when the command could not be started.
const EXIT_LAUNCH: u8 = 127;

/// Exit status after a user interrupt.
const EXIT_INTERRUPTED: u8 = 130;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "perfmon", version, about = "Monitor the resource usage of a command")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seconds between samples
    #[arg(short, long, value_name = "SECONDS")]
    interval: Option<f64>,

    /// Report formats, comma separated
    #[arg(short, long, value_name = "FORMATS", value_delimiter = ',', value_parser = parse_format)]
    format: Option<Vec<ExportFormat>>,

    /// Directory for report files
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Disable the live metrics line
    #[arg(long)]
    no_live: bool,

    /// Disable terminal charts
    #[arg(long)]
    no_plots: bool,

    /// Disable network counters
    #[arg(long)]
    no_network: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Command to run, with its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            sampling_interval: self.interval,
            export_formats: self.format.clone(),
            output_dir: self.output_dir.clone(),
            no_live: self.no_live,
            no_plots: self.no_plots,
            no_network: self.no_network,
        }
    }
}

fn parse_format(value: &str) -> Result<ExportFormat, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(ExportFormat::Json),
        "csv" => Ok(ExportFormat::Csv),
        other => Err(format!("unknown format '{}' (expected json or csv)", other)),
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    eprintln!();
    eprintln!("{} v{}", APP_NAME, VERSION);
    eprintln!("Command Resource Monitor");
    eprintln!();
}

/// Cancels `token` on the first Ctrl-C.
///
/// The listener runs on its own single-threaded runtime so the sampling
/// threads stay plain OS threads.
fn install_interrupt_handler(token: CancelToken) {
    let spawned = thread::Builder::new()
        .name("perfmon-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Interrupt handling unavailable: {}", e);
                    return;
                }
            };

            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        debug!("Interrupt received");
                        token.cancel();
                    }
                    Err(e) => warn!("Interrupt handling unavailable: {}", e),
                }
            });
        });

    if let Err(e) = spawned {
        warn!("Interrupt handling unavailable: {}", e);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    print_banner();

    let config = match resolve_config(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    debug!("Effective configuration: {:?}", config);

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    info!("Running: {}", cli.command.join(" "));
    let outcome = match Monitor::new(config).run(&cli.command, &cancel) {
        Ok(outcome) => outcome,
        Err(MonitorError::Launch(_)) => return ExitCode::from(EXIT_LAUNCH),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    for e in &outcome.export_errors {
        warn!("{}", e);
    }
    eprintln!();
    eprint!("{}", format_summary(&outcome));

    if outcome.was_interrupted() {
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    if outcome.run.state() == RunState::Failed {
        return ExitCode::FAILURE;
    }

    match outcome.run.exit_code {
        Some(code) => ExitCode::from((code & 0xff) as u8),
        None => ExitCode::FAILURE,
    }
}
