//! Reporting Module
//!
//! Presents samples while a run is in progress and summarizes them once it
//! has finished.
//!
//! - [`live`]: Live status line
//! - [`export`]: JSON and CSV reports with per-metric statistics
//! - [`plot`]: Terminal charts

pub mod export;
pub mod live;
pub mod plot;

pub use export::{summarize, MetricSummary, ReportExporter, RunReport};
pub use live::{LiveSink, LiveView, TerminalSink};
pub use plot::PlotRenderer;
