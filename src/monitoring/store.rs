//! Time Series Storage
//!
//! [`TimeSeriesStore`] collects samples while a run is active. The sampler
//! is its only writer; the live view and the reporters only read. Once the
//! run ends the store is frozen into an immutable [`TimeSeries`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, TryLockError};

use super::sample::Sample;

/// Append-only sample container shared between the sampler and readers.
#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    samples: RwLock<Vec<Sample>>,
    frozen: AtomicBool,
}

impl TimeSeriesStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample.
    ///
    /// # Panics
    ///
    /// Panics if the store is frozen or if the sample's timestamp does not
    /// come strictly after the previous one.
    pub fn append(&self, sample: Sample) {
        let mut samples = self.samples.write().unwrap_or_else(|e| e.into_inner());

        assert!(
            !self.frozen.load(Ordering::Acquire),
            "sample appended to a frozen time series"
        );
        if let Some(last) = samples.last() {
            assert!(
                sample.timestamp > last.timestamp,
                "sample timestamp {} does not follow {}",
                sample.timestamp,
                last.timestamp
            );
        }

        samples.push(sample);
    }

    /// Returns the sample count and the most recent sample without blocking.
    ///
    /// Returns `None` when the store is empty or the writer currently holds
    /// the lock; callers simply retry on their next tick.
    pub fn latest(&self) -> Option<(usize, Sample)> {
        let samples = match self.samples.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        samples.last().map(|s| (samples.len(), s.clone()))
    }

    /// Copies every sample appended so far.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.samples.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Seals the store and returns its contents as an immutable series.
    ///
    /// Freezing twice returns the same contents.
    pub fn freeze(&self) -> TimeSeries {
        let samples = self.samples.write().unwrap_or_else(|e| e.into_inner());
        self.frozen.store(true, Ordering::Release);
        TimeSeries {
            samples: Arc::from(samples.as_slice()),
        }
    }
}

/// Immutable, ordered samples of a finished run. Cheap to clone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    samples: Arc<[Sample]>,
}

impl TimeSeries {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Seconds between the first and last sample.
    pub fn span_seconds(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}

impl From<Vec<Sample>> for TimeSeries {
    fn from(samples: Vec<Sample>) -> Self {
        Self {
            samples: Arc::from(samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sample::sample_at;
    use std::thread;

    #[test]
    fn test_store_creation() {
        let store = TimeSeriesStore::new();
        assert!(store.is_empty());
        assert!(!store.is_frozen());
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_append_and_latest() {
        let store = TimeSeriesStore::new();
        store.append(sample_at(0.0, 1.0, 100));
        store.append(sample_at(0.5, 2.0, 200));

        let (count, latest) = store.latest().unwrap();
        assert_eq!(count, 2);
        assert_eq!(latest.cpu_percent, 2.0);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn test_append_after_freeze_panics() {
        let store = TimeSeriesStore::new();
        store.append(sample_at(0.0, 1.0, 100));
        let _ = store.freeze();
        store.append(sample_at(1.0, 1.0, 100));
    }

    #[test]
    #[should_panic(expected = "does not follow")]
    fn test_non_increasing_timestamp_panics() {
        let store = TimeSeriesStore::new();
        store.append(sample_at(1.0, 1.0, 100));
        store.append(sample_at(1.0, 1.0, 100));
    }

    #[test]
    fn test_freeze_preserves_order() {
        let store = TimeSeriesStore::new();
        for i in 0..5 {
            store.append(sample_at(i as f64 * 0.1, i as f64, i));
        }

        let series = store.freeze();
        assert!(store.is_frozen());
        assert_eq!(series.len(), 5);
        let timestamps: Vec<f64> = series.samples().iter().map(|s| s.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert!((series.span_seconds() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_freeze_empty() {
        let store = TimeSeriesStore::new();
        let series = store.freeze();
        assert!(series.is_empty());
        assert_eq!(series.span_seconds(), 0.0);
    }

    #[test]
    fn test_concurrent_readers_see_whole_samples() {
        let store = Arc::new(TimeSeriesStore::new());
        let writer_store = Arc::clone(&store);

        let writer = thread::spawn(move || {
            for i in 0..500u64 {
                writer_store.append(sample_at(i as f64, i as f64, i));
            }
        });

        let reader_store = Arc::clone(&store);
        let reader = thread::spawn(move || {
            let mut last_seen = 0;
            for _ in 0..2000 {
                if let Some((count, sample)) = reader_store.latest() {
                    // A sample is either complete or absent.
                    assert_eq!(sample.cpu_percent as u64, sample.mem_rss_bytes);
                    assert!(count >= last_seen);
                    last_seen = count;
                }
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(), 500);
    }
}
