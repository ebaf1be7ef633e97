use super::metrics::BatchPerformanceMetric;

/// Confidence a prediction must exceed before the advisor uses it.
pub const PREDICTOR_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub batch_size: usize,
    /// 0..1
    pub confidence: f64,
}

/// Pluggable batch-size model consulted ahead of the heuristics.
pub trait BatchSizePredictor: Send + Sync {
    /// Suggests a size given the recent history (oldest first), or `None` to abstain.
    fn predict(&self, history: &[BatchPerformanceMetric], current: usize) -> Option<Prediction>;
}

/// Never predicts, leaving every decision to the heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOnly;

impl BatchSizePredictor for HeuristicOnly {
    fn predict(&self, _history: &[BatchPerformanceMetric], _current: usize) -> Option<Prediction> {
        None
    }
}
