use std::collections::VecDeque;
use std::time::Duration;
use serde::Serialize;
use crate::memory::MemoryPressureLevel;

/// Samples considered when computing a trend.
pub const TREND_WINDOW: usize = 5;

/// One record per completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPerformanceMetric {
    pub processing_time: Duration,
    /// Memory usage ratio at batch end, 0..1
    pub memory_usage: f64,
    /// CPU usage ratio at batch end, 0..1
    pub cpu_usage: f64,
    pub batch_size: usize,
    /// Items per second
    pub throughput: f64,
    pub pressure: MemoryPressureLevel,
}

impl BatchPerformanceMetric {
    /// Items per second, 0 when no time elapsed.
    pub fn throughput_of(items: usize, processing_time: Duration) -> f64 {
        let secs = processing_time.as_secs_f64();
        if secs > 0.0 {
            items as f64 / secs
        } else {
            0.0
        }
    }
}

/// Normalized direction of the recent history, each in -1..1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trends {
    pub throughput: f64,
    pub memory: f64,
    pub processing_time: f64,
}

/// Fixed-capacity ring of batch metrics; the oldest record is evicted first.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    entries: VecDeque<BatchPerformanceMetric>,
    capacity: usize,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, metric: BatchPerformanceMetric) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(metric);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&BatchPerformanceMetric> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchPerformanceMetric> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<BatchPerformanceMetric> {
        self.entries.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Trends over the last [`TREND_WINDOW`] records.
    pub fn trends(&self) -> Trends {
        let start = self.entries.len().saturating_sub(TREND_WINDOW);
        let recent: Vec<&BatchPerformanceMetric> = self.entries.iter().skip(start).collect();
        let series = |f: fn(&BatchPerformanceMetric) -> f64| recent.iter().map(|m| f(m)).collect::<Vec<_>>();

        Trends {
            throughput: normalized_trend(&series(|m| m.throughput)),
            memory: normalized_trend(&series(|m| m.memory_usage)),
            processing_time: normalized_trend(&series(|m| m.processing_time.as_secs_f64())),
        }
    }
}

/// Least-squares slope of `values` against their index, divided by the largest
/// absolute value and clamped to -1..1. Flat, short or non-finite series yield 0.
pub fn normalized_trend(values: &[f64]) -> f64 {
    if values.len() < 2 || values.iter().any(|v| !v.is_finite()) {
        return 0.0;
    }
    if values.iter().all(|v| *v == values[0]) {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (y - mean_y);
        denominator += dx * dx;
    }

    let max_abs = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if denominator == 0.0 || max_abs == 0.0 {
        return 0.0;
    }

    let trend = (numerator / denominator) / max_abs;
    if trend.is_finite() {
        trend.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn metric(throughput: f64, memory_usage: f64) -> BatchPerformanceMetric {
        BatchPerformanceMetric {
            processing_time: Duration::from_secs(1),
            memory_usage,
            cpu_usage: 0.1,
            batch_size: 10,
            throughput,
            pressure: MemoryPressureLevel::Normal,
        }
    }

    #[rstest]
    #[case(&[], 0.0)]
    #[case(&[4.0], 0.0)]
    #[case(&[3.0, 3.0, 3.0], 0.0)]
    #[case(&[0.0, 0.0], 0.0)]
    #[case(&[1.0, f64::NAN, 2.0], 0.0)]
    fn degenerate_series_have_no_trend(#[case] values: &[f64], #[case] expected: f64) {
        assert_eq!(normalized_trend(values), expected);
    }

    #[test]
    fn trend_sign_follows_direction() {
        let rising = normalized_trend(&[10.0, 12.0, 14.0, 16.0, 18.0]);
        assert!((rising - 2.0 / 18.0).abs() < 1e-9);
        assert!(normalized_trend(&[18.0, 16.0, 14.0]) < 0.0);
        assert!(normalized_trend(&[0.0, 100.0]) <= 1.0);
    }

    #[test]
    fn throughput_guards_zero_duration() {
        assert_eq!(BatchPerformanceMetric::throughput_of(10, Duration::ZERO), 0.0);
        assert_eq!(BatchPerformanceMetric::throughput_of(10, Duration::from_millis(500)), 20.0);
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = MetricsHistory::new(3);
        for i in 0..5 {
            history.push(metric(i as f64, 0.1));
        }
        assert_eq!(history.len(), 3);
        let kept: Vec<f64> = history.iter().map(|m| m.throughput).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn trends_use_recent_window_only() {
        let mut history = MetricsHistory::new(10);
        // Falling early samples outside the window must not matter
        for t in [100.0, 80.0, 60.0, 10.0, 11.0, 12.0, 13.0, 14.0] {
            history.push(metric(t, 0.3));
        }
        let trends = history.trends();
        assert!(trends.throughput > 0.0);
        assert_eq!(trends.memory, 0.0);
        assert_eq!(trends.processing_time, 0.0);
    }
}
