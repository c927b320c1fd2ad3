//! Terminal Charts
//!
//! Renders ASCII line charts of CPU and memory usage over the elapsed
//! seconds of a finished run.

use std::env;

use crate::error::RenderError;
use crate::monitoring::{Sample, TimeSeries};

/// Terminal width assumed when `COLUMNS` is unset or invalid.
pub const DEFAULT_TERMINAL_WIDTH: usize = 80;

/// Columns reserved for the y-axis labels and frame.
const LABEL_WIDTH: usize = 11;

/// Narrowest plot area that still reads as a chart.
const MIN_PLOT_WIDTH: usize = 10;

/// Quantity drawn by one chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartMetric {
    Cpu,
    Memory,
}

impl ChartMetric {
    pub const ALL: [ChartMetric; 2] = [ChartMetric::Cpu, ChartMetric::Memory];

    fn title(self) -> &'static str {
        match self {
            ChartMetric::Cpu => "CPU Usage Over Time (%)",
            ChartMetric::Memory => "Memory Usage Over Time (MB)",
        }
    }

    fn value(self, sample: &Sample) -> f64 {
        match self {
            ChartMetric::Cpu => sample.cpu_percent,
            ChartMetric::Memory => sample.mem_rss_bytes as f64 / (1024.0 * 1024.0),
        }
    }
}

/// Current terminal width from `COLUMNS`.
pub fn terminal_width() -> usize {
    env::var("COLUMNS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_TERMINAL_WIDTH)
}

/// Picks at most `max_points` items at a fixed stride, always keeping the
/// first and last item.
pub fn downsample<T>(items: &[T], max_points: usize) -> Vec<&T> {
    let max_points = max_points.max(2);
    if items.len() <= max_points {
        return items.iter().collect();
    }

    let last = items.len() - 1;
    let stride = last.div_ceil(max_points - 1);

    let mut picked: Vec<&T> = items.iter().step_by(stride).collect();
    if (last % stride) != 0 {
        picked.push(&items[last]);
    }
    picked
}

/// Draws charts for a frozen series.
#[derive(Debug, Clone)]
pub struct PlotRenderer {
    width: usize,
    height: usize,
}

impl PlotRenderer {
    /// Creates a renderer for a terminal `width` columns wide, with
    /// `height` rows per chart.
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Columns available for data points.
    pub fn plot_width(&self) -> usize {
        self.width.saturating_sub(LABEL_WIDTH)
    }

    /// Renders one chart per [`ChartMetric`].
    pub fn render(&self, series: &TimeSeries) -> Result<String, RenderError> {
        if self.plot_width() < MIN_PLOT_WIDTH {
            return Err(RenderError::Chart(format!(
                "terminal too narrow ({} columns)",
                self.width
            )));
        }
        if self.height < 2 {
            return Err(RenderError::Chart(format!(
                "chart height must be at least 2 rows, got {}",
                self.height
            )));
        }

        let mut output = String::new();
        for metric in ChartMetric::ALL {
            output.push_str(&self.render_metric(series, metric));
            output.push('\n');
        }
        Ok(output)
    }

    fn render_metric(&self, series: &TimeSeries, metric: ChartMetric) -> String {
        let mut output = format!("\n{}\n\n", metric.title());

        if series.is_empty() {
            output.push_str("  (no samples collected)\n");
            return output;
        }

        let width = self.plot_width();
        let points = downsample(series.samples(), width);
        let values: Vec<f64> = points.iter().map(|s| metric.value(s)).collect();

        let max = values.iter().copied().fold(f64::MIN, f64::max);
        let min = values.iter().copied().fold(f64::MAX, f64::min).min(0.0);
        let range = if max > min { max - min } else { 1.0 };

        let rows = self.height;
        let mut grid = vec![vec![' '; width]; rows];
        let last_index = (points.len() - 1).max(1);

        for (i, value) in values.iter().enumerate() {
            let column = if points.len() == 1 {
                0
            } else {
                i * (width - 1) / last_index
            };
            let level = ((value - min) / range * (rows - 1) as f64).round() as usize;
            grid[rows - 1 - level.min(rows - 1)][column] = '*';
        }

        for (row_index, row) in grid.iter().enumerate() {
            let label = match row_index {
                0 => format_axis(max),
                r if r == rows - 1 => format_axis(min),
                _ => String::new(),
            };
            output.push_str(&format!("{:>9} |{}\n", label, row.iter().collect::<String>()));
        }

        let first_t = points.first().map(|s| s.timestamp).unwrap_or(0.0);
        let last_t = points.last().map(|s| s.timestamp).unwrap_or(0.0);
        output.push_str(&format!("{:>9} +{}\n", "", "-".repeat(width)));

        let start_label = format!("{:.1}s", first_t);
        let end_label = format!("{:.1}s", last_t);
        let gap = width.saturating_sub(start_label.len() + end_label.len());
        output.push_str(&format!(
            "{:>9}  {}{}{}\n",
            "",
            start_label,
            " ".repeat(gap),
            end_label
        ));

        output
    }
}

fn format_axis(value: f64) -> String {
    if value.abs() >= 1000.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}
