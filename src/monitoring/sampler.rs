//! Periodic Sampler
//!
//! Drives a [`MetricSource`] on a fixed cadence for as long as the
//! monitored process lives, appending each measurement to a
//! [`TimeSeriesStore`].
//!
//! Tick `n` is scheduled at `start + n * interval`, so time spent measuring
//! does not accumulate into drift. Ticks that are already in the past when
//! the previous one finishes are skipped rather than run back to back.
//!
//! Measurements run on a dedicated worker thread so that a stalled read of
//! OS counters costs a bounded amount of time: a tick whose measurement does
//! not arrive in time is counted as skipped and sampling carries on. At most
//! one request is outstanding at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::SamplingError;
use crate::execution::launcher::LaunchedProcess;

use super::resource::{max_cpu_percent, Measurement, MetricSource};
use super::sample::Sample;
use super::store::TimeSeriesStore;

/// Longest uninterrupted sleep; bounds how late a stop request is noticed.
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Shortest interval the sampler will schedule.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Smallest per-tick measurement budget. A full process table refresh can
/// take longer than a short interval.
pub const MIN_MEASURE_TIMEOUT: Duration = Duration::from_millis(250);

/// Shared flag requesting that a run stop early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why the sampling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The monitored process exited.
    ProcessExited,
    /// A stop was requested through the [`CancelToken`].
    Cancelled,
    /// The metric source can no longer produce measurements.
    SourceFailed,
}

/// Summary of a finished sampling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerReport {
    /// Samples appended to the store
    pub samples: usize,
    /// Ticks dropped because a measurement failed or timed out
    pub skipped_ticks: usize,
    pub stop_reason: StopReason,
}

/// Anything the sampler can poll for liveness.
pub trait ProcessProbe {
    fn pid(&self) -> u32;
    fn started_at(&self) -> Instant;
    fn has_exited(&self) -> bool;
}

impl ProcessProbe for LaunchedProcess {
    fn pid(&self) -> u32 {
        LaunchedProcess::pid(self)
    }

    fn started_at(&self) -> Instant {
        LaunchedProcess::started_at(self)
    }

    fn has_exited(&self) -> bool {
        self.try_exit_code().is_some()
    }
}

type MeasureResult = (u64, Instant, Result<Measurement, SamplingError>);

/// Owns the [`MetricSource`] on its own thread and answers tick requests.
struct MeasureWorker {
    requests: Sender<u64>,
    results: Receiver<MeasureResult>,
    /// Tick whose answer has not been received yet
    outstanding: Option<u64>,
}

impl MeasureWorker {
    fn spawn<S: MetricSource + 'static>(mut source: S, pid: u32) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<u64>();
        let (result_tx, result_rx) = mpsc::channel::<MeasureResult>();

        // Detached: a stalled read must not block the sampler on shutdown.
        let spawned = thread::Builder::new()
            .name("perfmon-measure".to_string())
            .spawn(move || {
                for tick in request_rx {
                    let taken_at = Instant::now();
                    let result = source.measure(pid);
                    if result_tx.send((tick, taken_at, result)).is_err() {
                        break;
                    }
                }
            });

        if let Err(e) = spawned {
            warn!("Failed to start measurement worker: {}", e);
        }

        Self {
            requests: request_tx,
            results: result_rx,
            outstanding: None,
        }
    }

    fn request(&mut self, tick: u64) -> Result<(), SamplingError> {
        self.requests
            .send(tick)
            .map_err(|_| SamplingError::WorkerGone)?;
        self.outstanding = Some(tick);
        Ok(())
    }

    /// Requests a measurement for `tick` and waits at most `timeout` for it.
    ///
    /// While an earlier request is still being served no new one is queued;
    /// its late answer is discarded once it arrives and `tick` is requested
    /// in its place.
    fn measure(
        &mut self,
        tick: u64,
        timeout: Duration,
    ) -> Result<(Instant, Measurement), SamplingError> {
        if self.outstanding.is_none() {
            self.request(tick)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results.recv_timeout(remaining) {
                Ok((answered, _, _)) if answered != tick => {
                    debug!("Discarding late measurement for tick {}", answered);
                    self.request(tick)?;
                }
                Ok((_, taken_at, result)) => {
                    self.outstanding = None;
                    return result.map(|m| (taken_at, m));
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SamplingError::Timeout {
                        millis: timeout.as_millis(),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => return Err(SamplingError::WorkerGone),
            }
        }
    }
}

/// Fixed-cadence sampling loop.
pub struct Sampler<S> {
    source: S,
    interval: Duration,
    measure_timeout: Duration,
}

impl<S: MetricSource + 'static> Sampler<S> {
    /// Creates a sampler. Each measurement may take one interval, or
    /// [`MIN_MEASURE_TIMEOUT`] when the interval is shorter.
    pub fn new(source: S, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        Self {
            source,
            interval,
            measure_timeout: interval.max(MIN_MEASURE_TIMEOUT),
        }
    }

    /// Overrides the per-tick measurement time budget.
    pub fn with_measure_timeout(mut self, timeout: Duration) -> Self {
        self.measure_timeout = timeout;
        self
    }

    pub fn measure_timeout(&self) -> Duration {
        self.measure_timeout
    }

    /// Samples `process` into `store` until it exits or `cancel` fires.
    ///
    /// A measurement already in flight when `cancel` fires is still
    /// appended, so the store holds every completed sample.
    pub fn run<P: ProcessProbe>(
        self,
        process: &P,
        store: &TimeSeriesStore,
        cancel: &CancelToken,
    ) -> SamplerReport {
        let start = process.started_at();
        let mut worker = MeasureWorker::spawn(self.source, process.pid());
        let interval = self.interval;

        let mut tick: u64 = 0;
        let mut samples = 0;
        let mut skipped_ticks = 0;

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if process.has_exited() {
                break StopReason::ProcessExited;
            }

            match worker.measure(tick, self.measure_timeout) {
                Ok((taken_at, measurement)) => {
                    let timestamp = taken_at.saturating_duration_since(start).as_secs_f64();
                    store.append(to_sample(timestamp, measurement));
                    samples += 1;
                }
                Err(SamplingError::ProcessVanished { pid }) => {
                    debug!("Process {} vanished during measurement", pid);
                    // An interrupt also reaches the child's process group.
                    if cancel.is_cancelled() {
                        break StopReason::Cancelled;
                    }
                    break StopReason::ProcessExited;
                }
                Err(SamplingError::WorkerGone) => {
                    warn!("Measurement worker stopped; ending sampling");
                    break StopReason::SourceFailed;
                }
                Err(e) => {
                    warn!("Skipping sample at tick {}: {}", tick, e);
                    skipped_ticks += 1;
                }
            }

            tick = next_tick(start, interval, tick, Instant::now());

            if let Some(reason) = sleep_until(start + interval.mul_f64(tick as f64), process, cancel) {
                break reason;
            }
        };

        debug!(
            "Sampler stopped ({:?}) after {} samples, {} skipped ticks",
            stop_reason, samples, skipped_ticks
        );

        SamplerReport {
            samples,
            skipped_ticks,
            stop_reason,
        }
    }
}

/// Index of the next tick scheduled after `now`, always greater than
/// `current`.
fn next_tick(start: Instant, interval: Duration, current: u64, now: Instant) -> u64 {
    let elapsed = now.saturating_duration_since(start).as_secs_f64();
    let due = ((elapsed / interval.as_secs_f64()).floor() as u64).saturating_add(1);
    due.max(current.saturating_add(1))
}

/// Sleeps until `deadline` in short slices, returning early when the run
/// should stop.
fn sleep_until<P: ProcessProbe>(
    deadline: Instant,
    process: &P,
    cancel: &CancelToken,
) -> Option<StopReason> {
    loop {
        if cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if process.has_exited() {
            return Some(StopReason::ProcessExited);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        thread::sleep(remaining.min(POLL_SLICE));
    }
}

fn to_sample(timestamp: f64, m: Measurement) -> Sample {
    Sample {
        timestamp,
        cpu_percent: m.cpu_percent.clamp(0.0, max_cpu_percent()),
        mem_rss_bytes: m.mem_rss_bytes,
        mem_percent: m.mem_percent.max(0.0),
        io_read_bytes: m.io_read_bytes,
        io_write_bytes: m.io_write_bytes,
        process_count: m.process_count,
        thread_count: m.thread_count,
        net_sent_bytes: m.net_sent_bytes,
        net_recv_bytes: m.net_recv_bytes,
    }
}
