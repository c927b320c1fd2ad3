//! Resource Samples
//!
//! A [`Sample`] is one timestamped snapshot of the monitored process tree.
//! [`Metric`] names each recorded quantity and is shared by the exporters,
//! the live view and the chart renderer so columns stay consistent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One resource usage snapshot of the monitored process tree.
///
/// I/O and network counters are cumulative since the run started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the monitored command was spawned (monotonic clock)
    pub timestamp: f64,
    /// CPU usage summed over the tree (0 to 100 × cores)
    pub cpu_percent: f64,
    /// Resident set size summed over the tree
    pub mem_rss_bytes: u64,
    /// Resident set size as a share of total system memory
    pub mem_percent: f64,
    /// Bytes read from storage
    pub io_read_bytes: u64,
    /// Bytes written to storage
    pub io_write_bytes: u64,
    /// Processes in the monitored tree
    pub process_count: u32,
    /// Threads summed over the tree
    #[serde(default)]
    pub thread_count: u32,
    /// Host bytes sent, when network monitoring is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_sent_bytes: Option<u64>,
    /// Host bytes received, when network monitoring is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_recv_bytes: Option<u64>,
}

/// A recorded quantity of a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    CpuPercent,
    MemRssBytes,
    MemPercent,
    IoReadBytes,
    IoWriteBytes,
    ProcessCount,
    ThreadCount,
    NetSentBytes,
    NetRecvBytes,
}

impl Metric {
    /// All metrics in report column order.
    pub const ALL: [Metric; 9] = [
        Metric::CpuPercent,
        Metric::MemRssBytes,
        Metric::MemPercent,
        Metric::IoReadBytes,
        Metric::IoWriteBytes,
        Metric::ProcessCount,
        Metric::ThreadCount,
        Metric::NetSentBytes,
        Metric::NetRecvBytes,
    ];

    /// Metrics recorded for a run, in column order.
    pub fn enabled(monitor_network: bool) -> Vec<Metric> {
        Self::ALL
            .into_iter()
            .filter(|metric| monitor_network || !metric.is_network())
            .collect()
    }

    /// Field name used in reports.
    pub fn name(self) -> &'static str {
        match self {
            Metric::CpuPercent => "cpu_percent",
            Metric::MemRssBytes => "mem_rss_bytes",
            Metric::MemPercent => "mem_percent",
            Metric::IoReadBytes => "io_read_bytes",
            Metric::IoWriteBytes => "io_write_bytes",
            Metric::ProcessCount => "process_count",
            Metric::ThreadCount => "thread_count",
            Metric::NetSentBytes => "net_sent_bytes",
            Metric::NetRecvBytes => "net_recv_bytes",
        }
    }

    pub fn is_network(self) -> bool {
        matches!(self, Metric::NetSentBytes | Metric::NetRecvBytes)
    }

    /// Reads this metric from a sample. Network metrics missing from the
    /// sample read as zero.
    pub fn value(self, sample: &Sample) -> f64 {
        match self {
            Metric::CpuPercent => sample.cpu_percent,
            Metric::MemRssBytes => sample.mem_rss_bytes as f64,
            Metric::MemPercent => sample.mem_percent,
            Metric::IoReadBytes => sample.io_read_bytes as f64,
            Metric::IoWriteBytes => sample.io_write_bytes as f64,
            Metric::ProcessCount => f64::from(sample.process_count),
            Metric::ThreadCount => f64::from(sample.thread_count),
            Metric::NetSentBytes => sample.net_sent_bytes.unwrap_or(0) as f64,
            Metric::NetRecvBytes => sample.net_recv_bytes.unwrap_or(0) as f64,
        }
    }

    /// Formats this metric's raw value for a CSV cell.
    pub fn format_value(self, sample: &Sample) -> String {
        match self {
            Metric::CpuPercent => sample.cpu_percent.to_string(),
            Metric::MemRssBytes => sample.mem_rss_bytes.to_string(),
            Metric::MemPercent => sample.mem_percent.to_string(),
            Metric::IoReadBytes => sample.io_read_bytes.to_string(),
            Metric::IoWriteBytes => sample.io_write_bytes.to_string(),
            Metric::ProcessCount => sample.process_count.to_string(),
            Metric::ThreadCount => sample.thread_count.to_string(),
            Metric::NetSentBytes => sample.net_sent_bytes.map(|v| v.to_string()).unwrap_or_default(),
            Metric::NetRecvBytes => sample.net_recv_bytes.map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
pub(crate) fn sample_at(timestamp: f64, cpu_percent: f64, mem_rss_bytes: u64) -> Sample {
    Sample {
        timestamp,
        cpu_percent,
        mem_rss_bytes,
        mem_percent: 0.0,
        io_read_bytes: 0,
        io_write_bytes: 0,
        process_count: 1,
        thread_count: 1,
        net_sent_bytes: None,
        net_recv_bytes: None,
    }
}
