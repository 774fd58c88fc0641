//! Runtime histograms for the detection and recovery paths.
//! Each metric keeps a bounded window of samples and reports p50/p95/p99.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Measures elapsed time and records it (in microseconds) on `finish`.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Bounded sample window; the oldest sample is overwritten once full.
struct SampleWindow {
    samples: Vec<f64>,
    next: usize,
    filled: usize,
}

impl SampleWindow {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            next: 0,
            filled: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.next] = value;
        self.next = (self.next + 1) % capacity;
        self.filled = (self.filled + 1).min(capacity);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let mut sorted = self.samples[..self.filled].to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = ((p / 100.0) * (self.filled as f64 - 1.0)).round() as usize;
        sorted[rank.min(self.filled - 1)]
    }
}

pub struct MetricsRegistry {
    windows: Mutex<HashMap<&'static str, SampleWindow>>,
    window_size: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_window(512)
    }

    pub fn with_window(window_size: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_size,
        }
    }

    /// Record one sample for the named metric. Units are metric-specific.
    pub fn record(&self, name: &'static str, value: f64) {
        self.windows
            .lock()
            .entry(name)
            .or_insert_with(|| SampleWindow::with_capacity(self.window_size))
            .push(value);
        tracing::trace!(metric = name, value, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.windows
            .lock()
            .get(name)
            .map(|w| w.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn count(&self, name: &str) -> usize {
        self.windows.lock().get(name).map(|w| w.filled).unwrap_or(0)
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        self.windows
            .lock()
            .iter()
            .map(|(&name, window)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50: window.percentile(50.0),
                        p95: window.percentile(95.0),
                        p99: window.percentile(99.0),
                        count: window.filled,
                    },
                )
            })
            .collect()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

pub mod metric_names {
    /// Confidence percent of every evaluated window.
    pub const DETECTION_CONFIDENCE: &str = "detection_confidence_pct";
    /// Microseconds from dispatch to successful platform delivery.
    pub const NOTIFY_DELIVERY: &str = "t_notify_delivered";
    /// Microseconds spent in one recovery run, retries included.
    pub const RECOVERY_RUN: &str = "t_recovery_run";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_over_window() {
        let registry = MetricsRegistry::with_window(100);
        for v in 1..=100 {
            registry.record(metric_names::DETECTION_CONFIDENCE, v as f64);
        }
        assert_eq!(registry.count(metric_names::DETECTION_CONFIDENCE), 100);
        assert_eq!(registry.percentile(metric_names::DETECTION_CONFIDENCE, 50.0), 51.0);
        assert_eq!(registry.percentile(metric_names::DETECTION_CONFIDENCE, 99.0), 99.0);
    }

    #[test]
    fn test_window_overwrites_oldest() {
        let registry = MetricsRegistry::with_window(2);
        registry.record(metric_names::RECOVERY_RUN, 1000.0);
        registry.record(metric_names::RECOVERY_RUN, 1.0);
        registry.record(metric_names::RECOVERY_RUN, 2.0);
        assert_eq!(registry.count(metric_names::RECOVERY_RUN), 2);
        assert_eq!(registry.percentile(metric_names::RECOVERY_RUN, 100.0), 2.0);
    }

    #[test]
    fn test_unknown_metric_is_zero() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
        assert!(registry.summary().is_empty());
    }
}
