mod advisor;
mod config;
mod metrics;
mod ordering;
mod predictor;
mod processor;
mod report;

pub use advisor::{AdjustmentReason, AdvisorState, BatchSizeAdvisor, BatchSizeRecommendation, DEAD_BAND, WARMUP_SAMPLES};
pub use config::{AdvisorConfiguration, BatchSettings, LiveBatchSize};
pub use metrics::{normalized_trend, BatchPerformanceMetric, MetricsHistory, Trends, TREND_WINDOW};
pub use ordering::{apply_order, group_by_key, BatchItem, OrderStrategy};
pub use predictor::{BatchSizePredictor, HeuristicOnly, Prediction, PREDICTOR_CONFIDENCE_THRESHOLD};
pub use processor::{BatchProcessor, CleanupHook};
pub use report::{RunStatus, RunSummary};
