//! Resource Monitoring Module
//!
//! Collects resource samples for a running process tree.
//!
//! # Components
//!
//! - [`resource`]: Reads CPU, memory, disk and network counters
//! - [`sampler`]: Drift-corrected sampling loop
//! - [`store`]: Append-only time series shared with readers
//! - [`sample`]: The sample record and its metric fields

pub mod resource;
pub mod sample;
pub mod sampler;
pub mod store;

pub use resource::{Measurement, MetricSource, SystemMetricSource};
pub use sample::{Metric, Sample};
pub use sampler::{CancelToken, ProcessProbe, Sampler, SamplerReport, StopReason};
pub use store::{TimeSeries, TimeSeriesStore};
