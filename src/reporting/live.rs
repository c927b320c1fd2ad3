//! Live Metrics View
//!
//! Shows the most recent sample while the monitored command runs. The view
//! polls the store on its own thread and never blocks the sampler: if
//! several samples arrive between two frames, only the newest is drawn.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use colored::Colorize;
use log::{debug, warn};

use crate::error::RenderError;
use crate::monitoring::{CancelToken, Sample, TimeSeriesStore};

/// Fastest refresh rate of the live view.
pub const MIN_REFRESH: Duration = Duration::from_millis(100);

/// Consumer of the latest sample.
pub trait LiveSink: Send {
    /// Draws one sample.
    fn render(&mut self, sample: &Sample) -> Result<(), RenderError>;

    /// Called once when the view stops.
    fn finish(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}

impl<K: LiveSink + ?Sized> LiveSink for Box<K> {
    fn render(&mut self, sample: &Sample) -> Result<(), RenderError> {
        (**self).render(sample)
    }

    fn finish(&mut self) -> Result<(), RenderError> {
        (**self).finish()
    }
}

/// Single status line rewritten in place on a terminal stream.
pub struct TerminalSink<W: Write + Send> {
    out: W,
    drawn: bool,
}

impl TerminalSink<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, drawn: false }
    }
}

impl<W: Write + Send> LiveSink for TerminalSink<W> {
    fn render(&mut self, sample: &Sample) -> Result<(), RenderError> {
        write!(self.out, "\r{}", status_line(sample))?;
        self.out.flush()?;
        self.drawn = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RenderError> {
        if self.drawn {
            writeln!(self.out)?;
            self.out.flush()?;
        }
        Ok(())
    }
}

/// One-line rendering of a sample.
pub fn status_line(sample: &Sample) -> String {
    let mut line = format!(
        "[{:>7.1}s] CPU {} | Mem {} | Read {} | Write {} | Procs {} | Threads {}",
        sample.timestamp,
        format!("{:>6.1}%", sample.cpu_percent).cyan(),
        format_bytes(sample.mem_rss_bytes).green(),
        format_bytes(sample.io_read_bytes).yellow(),
        format_bytes(sample.io_write_bytes).yellow(),
        sample.process_count,
        sample.thread_count,
    );

    if let (Some(sent), Some(recv)) = (sample.net_sent_bytes, sample.net_recv_bytes) {
        line.push_str(&format!(
            " | Net {} up {} down",
            format_bytes(sent).magenta(),
            format_bytes(recv).magenta()
        ));
    }
    line
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Background live view over a [`TimeSeriesStore`].
pub struct LiveView {
    stop: CancelToken,
    handle: JoinHandle<usize>,
}

impl LiveView {
    /// Starts rendering new samples from `store` every `refresh`
    /// (never faster than [`MIN_REFRESH`]).
    pub fn spawn<K: LiveSink + 'static>(
        store: Arc<TimeSeriesStore>,
        mut sink: K,
        refresh: Duration,
    ) -> io::Result<Self> {
        let stop = CancelToken::new();
        let stop_flag = stop.clone();
        let refresh = refresh.max(MIN_REFRESH);

        let handle = thread::Builder::new()
            .name("perfmon-live".to_string())
            .spawn(move || {
                let frames = render_loop(&store, &mut sink, refresh, &stop_flag);
                if let Err(e) = sink.finish() {
                    debug!("Live view cleanup failed: {}", e);
                }
                frames
            })?;

        Ok(Self { stop, handle })
    }

    /// Stops the view and returns how many frames were drawn.
    pub fn stop(self) -> usize {
        self.stop.cancel();
        self.handle.join().unwrap_or_else(|_| {
            warn!("Live view thread panicked");
            0
        })
    }
}

fn render_loop<K: LiveSink>(
    store: &TimeSeriesStore,
    sink: &mut K,
    refresh: Duration,
    stop: &CancelToken,
) -> usize {
    let mut rendered_count = 0;
    let mut frames = 0;
    let mut next_frame = Instant::now();

    while !stop.is_cancelled() {
        if let Some((count, sample)) = store.latest() {
            if count != rendered_count {
                if let Err(e) = sink.render(&sample) {
                    warn!("Live view disabled: {}", e);
                    break;
                }
                rendered_count = count;
                frames += 1;
            }
        }

        next_frame += refresh;
        // Short naps keep stop latency low at coarse refresh rates.
        while !stop.is_cancelled() && Instant::now() < next_frame {
            let remaining = next_frame.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(Duration::from_millis(20)));
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sample::sample_at;
    use std::sync::Mutex;

    /// Records rendered timestamps.
    struct RecordingSink {
        seen: Arc<Mutex<Vec<f64>>>,
        fail_after: Option<usize>,
    }

    impl LiveSink for RecordingSink {
        fn render(&mut self, sample: &Sample) -> Result<(), RenderError> {
            let mut seen = self.seen.lock().unwrap();
            if self.fail_after.is_some_and(|n| seen.len() >= n) {
                return Err(RenderError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
            }
            seen.push(sample.timestamp);
            Ok(())
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_status_line_contents() {
        colored::control::set_override(false);
        let mut sample = sample_at(2.5, 12.34, 2048);
        let line = status_line(&sample);
        assert!(line.contains("12.3%"));
        assert!(line.contains("2.0 KB"));
        assert!(line.contains("Threads 1"));
        assert!(!line.contains("Net"));

        sample.net_sent_bytes = Some(10);
        sample.net_recv_bytes = Some(20);
        assert!(status_line(&sample).contains("Net"));
    }

    #[test]
    fn test_terminal_sink_output() {
        let mut buffer = Vec::new();
        {
            let mut sink = TerminalSink::new(&mut buffer);
            sink.render(&sample_at(1.0, 5.0, 100)).unwrap();
            sink.finish().unwrap();
        }
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with('\r'));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_live_view_renders_only_new_samples() {
        let store = Arc::new(TimeSeriesStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seen: Arc::clone(&seen),
            fail_after: None,
        };

        let view = LiveView::spawn(Arc::clone(&store), sink, MIN_REFRESH).unwrap();
        store.append(sample_at(0.0, 1.0, 1));
        thread::sleep(Duration::from_millis(350));
        store.append(sample_at(1.0, 1.0, 1));
        thread::sleep(Duration::from_millis(350));
        let frames = view.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(frames, 2);
        assert_eq!(*seen, vec![0.0, 1.0]);
    }

    #[test]
    fn test_live_view_skips_intermediate_samples() {
        let store = Arc::new(TimeSeriesStore::new());
        for i in 0..50 {
            store.append(sample_at(i as f64, 1.0, 1));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seen: Arc::clone(&seen),
            fail_after: None,
        };
        let view = LiveView::spawn(Arc::clone(&store), sink, MIN_REFRESH).unwrap();
        thread::sleep(Duration::from_millis(250));
        view.stop();

        assert_eq!(*seen.lock().unwrap(), vec![49.0]);
    }

    #[test]
    fn test_live_view_stops_on_render_error() {
        let store = Arc::new(TimeSeriesStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seen: Arc::clone(&seen),
            fail_after: Some(1),
        };

        let view = LiveView::spawn(Arc::clone(&store), sink, MIN_REFRESH).unwrap();
        store.append(sample_at(0.0, 1.0, 1));
        thread::sleep(Duration::from_millis(250));
        store.append(sample_at(1.0, 1.0, 1));
        thread::sleep(Duration::from_millis(250));

        // Sampler side is unaffected.
        store.append(sample_at(2.0, 1.0, 1));
        assert_eq!(view.stop(), 1);
        assert_eq!(store.len(), 3);
    }
}
