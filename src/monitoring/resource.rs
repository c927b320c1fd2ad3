//! Resource Usage Measurement
//!
//! Reads CPU, memory, disk and network counters for a process and all of
//! its descendants. [`MetricSource`] is the seam between the sampler and
//! the operating system; [`SystemMetricSource`] implements it on top of
//! `sysinfo`.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use sysinfo::{Networks, Pid, ProcessRefreshKind, ProcessStatus, System};

use crate::error::SamplingError;

/// Logical cores on this host, cached for the lifetime of the process.
pub static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

/// Upper bound for a CPU percentage summed over a process tree.
pub fn max_cpu_percent() -> f64 {
    100.0 * *CORE_COUNT as f64
}

/// Counters read for one process tree at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub cpu_percent: f64,
    pub mem_rss_bytes: u64,
    pub mem_percent: f64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub process_count: u32,
    pub thread_count: u32,
    pub net_sent_bytes: Option<u64>,
    pub net_recv_bytes: Option<u64>,
}

/// Source of resource counters for a process tree.
pub trait MetricSource: Send {
    /// Measures the process `pid` and its descendants.
    ///
    /// Returns [`SamplingError::ProcessVanished`] once `pid` has exited.
    fn measure(&mut self, pid: u32) -> Result<Measurement, SamplingError>;
}

impl<S: MetricSource + ?Sized> MetricSource for Box<S> {
    fn measure(&mut self, pid: u32) -> Result<Measurement, SamplingError> {
        (**self).measure(pid)
    }
}

/// Host network byte counters at the start of monitoring.
#[derive(Debug, Clone, Copy)]
struct NetworkBaseline {
    sent: u64,
    received: u64,
}

/// [`MetricSource`] backed by `sysinfo`.
///
/// Network counters are host-wide and reported relative to the moment the
/// source was created.
pub struct SystemMetricSource {
    system: System,
    networks: Option<Networks>,
    baseline: Option<NetworkBaseline>,
}

impl SystemMetricSource {
    /// Creates a source. The first CPU reading of each process is zero
    /// because `sysinfo` needs two refreshes to compute a rate.
    pub fn new(monitor_network: bool) -> Self {
        let mut system = System::new();
        system.refresh_memory();

        let (networks, baseline) = if monitor_network {
            let networks = Networks::new_with_refreshed_list();
            let baseline = network_totals(&networks);
            (Some(networks), Some(baseline))
        } else {
            (None, None)
        };

        Self {
            system,
            networks,
            baseline,
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::new()
            .with_cpu()
            .with_memory()
            .with_disk_usage()
    }
}

impl MetricSource for SystemMetricSource {
    fn measure(&mut self, pid: u32) -> Result<Measurement, SamplingError> {
        self.system.refresh_processes_specifics(Self::refresh_kind());
        if self.system.processes().is_empty() {
            return Err(SamplingError::Unavailable(
                "process table could not be read".to_string(),
            ));
        }

        let root = Pid::from_u32(pid);
        match self.system.process(root) {
            Some(process) if !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) => {}
            _ => return Err(SamplingError::ProcessVanished { pid }),
        }

        let tree = process_tree(&self.system, root);
        let total_memory = self.system.total_memory();

        let mut measurement = Measurement::default();
        for tree_pid in &tree {
            let Some(process) = self.system.process(*tree_pid) else {
                continue;
            };
            let disk = process.disk_usage();

            measurement.cpu_percent += f64::from(process.cpu_usage());
            measurement.mem_rss_bytes += process.memory();
            measurement.io_read_bytes += disk.total_read_bytes;
            measurement.io_write_bytes += disk.total_written_bytes;
            measurement.process_count += 1;
            // Processes without a task list count as single-threaded.
            measurement.thread_count += process.tasks().map_or(1, |tasks| tasks.len().max(1) as u32);
        }

        measurement.cpu_percent = measurement.cpu_percent.clamp(0.0, max_cpu_percent());
        measurement.mem_percent = if total_memory > 0 {
            measurement.mem_rss_bytes as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        if let (Some(networks), Some(baseline)) = (self.networks.as_mut(), self.baseline) {
            networks.refresh();
            let current = network_totals(networks);
            measurement.net_sent_bytes = Some(current.sent.saturating_sub(baseline.sent));
            measurement.net_recv_bytes = Some(current.received.saturating_sub(baseline.received));
        }

        Ok(measurement)
    }
}

/// Sums transmitted and received bytes over all interfaces.
fn network_totals(networks: &Networks) -> NetworkBaseline {
    networks
        .list()
        .values()
        .fold(NetworkBaseline { sent: 0, received: 0 }, |acc, data| NetworkBaseline {
            sent: acc.sent + data.total_transmitted(),
            received: acc.received + data.total_received(),
        })
}

/// Collects `root` and every live descendant of it.
///
/// Threads listed as tasks of a process are skipped so that shared memory
/// is not counted once per thread.
fn process_tree(system: &System, root: Pid) -> HashSet<Pid> {
    let threads: HashSet<Pid> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| process.tasks().map(|tasks| (pid, tasks)))
        .flat_map(|(pid, tasks)| tasks.iter().filter(move |task| *task != pid).copied())
        .collect();

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if threads.contains(pid) {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = HashSet::from([root]);
    let mut pending = vec![root];
    while let Some(pid) = pending.pop() {
        for child in children.get(&pid).into_iter().flatten() {
            if tree.insert(*child) {
                pending.push(*child);
            }
        }
    }
    tree
}
