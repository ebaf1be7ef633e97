use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::memory::MemoryThresholds;
use super::ordering::OrderStrategy;

/// Tuning for the [`BatchSizeAdvisor`](super::BatchSizeAdvisor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdvisorConfiguration {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub default_batch_size: usize,
    /// Number of recent batches kept for trend analysis (at least 2)
    pub history_window_size: usize,
    /// Weight of the new target in exponential smoothing, 0..1
    pub smoothing_factor: f64,
    /// Minimum time between two published advisory recommendations
    #[serde(with = "duration_ms")]
    pub cooldown_period: Duration,
    /// Consult the configured predictor before the heuristics
    pub use_predictor: bool,
}

impl Default for AdvisorConfiguration {
    fn default() -> Self {
        Self {
            min_batch_size: 10,
            max_batch_size: 500,
            default_batch_size: 50,
            history_window_size: 10,
            smoothing_factor: 0.3,
            cooldown_period: Duration::from_secs(10),
            use_predictor: false,
        }
    }
}

impl AdvisorConfiguration {
    /// Advisor bounds taken from the run's batch settings.
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            min_batch_size: settings.min_batch_size,
            max_batch_size: settings.max_batch_size,
            default_batch_size: settings.batch_size,
            ..Self::default()
        }
        .validated()
    }

    /// Corrects out-of-range values instead of rejecting them.
    pub fn validated(self) -> Self {
        let min_batch_size = self.min_batch_size.max(1);
        let max_batch_size = self.max_batch_size.max(min_batch_size);
        let default_batch_size = self.default_batch_size.clamp(min_batch_size, max_batch_size);
        let history_window_size = self.history_window_size.max(2);
        let smoothing_factor = if self.smoothing_factor.is_finite() {
            self.smoothing_factor.clamp(0.0, 1.0)
        } else {
            Self::default().smoothing_factor
        };

        let validated = Self {
            min_batch_size,
            max_batch_size,
            default_batch_size,
            history_window_size,
            smoothing_factor,
            cooldown_period: self.cooldown_period,
            use_predictor: self.use_predictor,
        };
        if validated != self {
            warn!("Adjusted advisor configuration: {:?}", validated);
        }
        validated
    }
}

/// Per-run batching behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchSettings {
    /// When false the whole collection is handed to the work function at once
    pub is_enabled: bool,
    /// Starting batch size; adjusted live when adaptive sizing is on
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub use_adaptive_sizing: bool,
    pub memory_thresholds: MemoryThresholds,
    /// Cleanup pause between batches and between groups
    #[serde(with = "duration_ms")]
    pub pause_between_batches: Duration,
    pub order_strategy: OrderStrategy,
    /// Seed for [`OrderStrategy::Random`]; a fresh shuffle each run when absent
    pub shuffle_seed: Option<u64>,
    pub group_items_by_type: bool,
    /// Soft per-batch deadline; exceeding it only raises a warning
    #[serde(with = "option_duration_ms")]
    pub max_batch_processing_time: Option<Duration>,
    pub show_memory_warnings: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            is_enabled: true,
            batch_size: 50,
            min_batch_size: 10,
            max_batch_size: 500,
            use_adaptive_sizing: true,
            memory_thresholds: MemoryThresholds::default(),
            pause_between_batches: Duration::from_millis(100),
            order_strategy: OrderStrategy::None,
            shuffle_seed: None,
            group_items_by_type: false,
            max_batch_processing_time: Some(Duration::from_secs(300)),
            show_memory_warnings: true,
        }
    }
}

impl BatchSettings {
    /// Corrects out-of-range values instead of rejecting them.
    pub fn validated(self) -> Self {
        let min_batch_size = self.min_batch_size.max(1);
        let max_batch_size = self.max_batch_size.max(min_batch_size);
        let batch_size = self.batch_size.clamp(min_batch_size, max_batch_size);

        if batch_size != self.batch_size || min_batch_size != self.min_batch_size || max_batch_size != self.max_batch_size {
            warn!(
                "Adjusted batch sizes {}/{}/{} -> {}/{}/{} (size/min/max)",
                self.batch_size, self.min_batch_size, self.max_batch_size,
                batch_size, min_batch_size, max_batch_size
            );
        }

        Self {
            batch_size,
            min_batch_size,
            max_batch_size,
            memory_thresholds: self.memory_thresholds.validated(),
            ..self
        }
    }
}

/// The live batch size, shared between the batch loop and whoever adjusts it.
///
/// Every write is clamped to `[min, max]`.
#[derive(Debug, Clone)]
pub struct LiveBatchSize {
    value: Arc<AtomicUsize>,
    min: usize,
    max: usize,
}

impl LiveBatchSize {
    pub fn new(initial: usize, min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            value: Arc::new(AtomicUsize::new(initial.clamp(min, max))),
            min,
            max,
        }
    }

    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self::new(settings.batch_size, settings.min_batch_size, settings.max_batch_size)
    }

    pub fn get(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    /// Stores `size` clamped to the bounds and returns the stored value.
    pub fn set(&self, size: usize) -> usize {
        let size = size.clamp(self.min, self.max);
        self.value.store(size, Ordering::Release);
        size
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
