//! Batch size advice from recent batch performance.
//!
//! After every batch the advisor appends a [`BatchPerformanceMetric`] to a
//! bounded history and decides, in order:
//!
//! 1. fewer than three records: no advice yet (warming up)
//! 2. critical memory pressure: halve the size immediately, ignoring the cooldown
//! 3. still cooling down from the last advice: nothing
//! 4. a confident predictor: use its size
//! 5. otherwise the per-pressure-level heuristics
//!
//! Advisory targets go through exponential smoothing and are only published
//! once the smoothed size has moved at least [`DEAD_BAND`] away from the last
//! published size.

use std::fmt;
use std::time::Duration;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};
use crate::memory::{MemoryMonitor, MemoryPressureLevel};
use super::config::AdvisorConfiguration;
use super::metrics::{BatchPerformanceMetric, MetricsHistory, Trends};
use super::predictor::{BatchSizePredictor, HeuristicOnly, PREDICTOR_CONFIDENCE_THRESHOLD};

/// Records needed before any advice is given.
pub const WARMUP_SAMPLES: usize = 3;
/// Smallest change worth publishing.
pub const DEAD_BAND: f64 = 5.0;
/// Upper bound on a single heuristic step, in items.
const MAX_STEP: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdvisorState {
    /// No history
    Idle,
    /// Some history, not yet enough to advise
    Warming,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdjustmentReason {
    CriticalPressure,
    Predictor,
    ThroughputRising,
    ThroughputFalling,
    MediumPressure,
    HighPressure,
    /// Applied by the batch loop from the monitor's pressure level, before the advisor has enough history
    PressureGuard,
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::CriticalPressure => "critical memory pressure",
            Self::Predictor => "predictor",
            Self::ThroughputRising => "throughput rising",
            Self::ThroughputFalling => "throughput falling",
            Self::MediumPressure => "medium memory pressure",
            Self::HighPressure => "high memory pressure",
            Self::PressureGuard => "memory pressure guard",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSizeRecommendation {
    pub previous: usize,
    pub recommended: usize,
    pub reason: AdjustmentReason,
}

pub struct BatchSizeAdvisor {
    config: AdvisorConfiguration,
    monitor: MemoryMonitor,
    predictor: Box<dyn BatchSizePredictor>,
    history: MetricsHistory,
    /// Last published size
    recommended: usize,
    /// Unrounded smoothed size; small steps accumulate here between publications
    smoothed: f64,
    last_recommendation: Option<Instant>,
    adjustments: usize,
}

impl fmt::Debug for BatchSizeAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSizeAdvisor")
            .field("config", &self.config)
            .field("recommended", &self.recommended)
            .field("smoothed", &self.smoothed)
            .field("history", &self.history.len())
            .finish()
    }
}

impl BatchSizeAdvisor {
    pub fn new(config: AdvisorConfiguration, monitor: MemoryMonitor) -> Self {
        let config = config.validated();
        Self {
            history: MetricsHistory::new(config.history_window_size),
            recommended: config.default_batch_size,
            smoothed: config.default_batch_size as f64,
            last_recommendation: None,
            adjustments: 0,
            predictor: Box::new(HeuristicOnly),
            monitor,
            config,
        }
    }

    /// Replaces the default [`HeuristicOnly`] predictor. Only consulted when
    /// `use_predictor` is set in the configuration.
    pub fn with_predictor(mut self, predictor: impl BatchSizePredictor + 'static) -> Self {
        self.predictor = Box::new(predictor);
        self
    }

    pub fn config(&self) -> &AdvisorConfiguration {
        &self.config
    }

    pub fn state(&self) -> AdvisorState {
        match self.history.len() {
            0 => AdvisorState::Idle,
            n if n < WARMUP_SAMPLES => AdvisorState::Warming,
            _ => AdvisorState::Active,
        }
    }

    /// The last published size, or the default before any advice.
    pub fn recommended_batch_size(&self) -> usize {
        self.recommended
    }

    pub fn history(&self) -> Vec<BatchPerformanceMetric> {
        self.history.to_vec()
    }

    /// Number of recommendations published since creation or the last reset.
    pub fn adjustments(&self) -> usize {
        self.adjustments
    }

    /// Records a finished batch and returns new advice, if any.
    pub fn record_result(
        &mut self,
        batch_size: usize,
        processing_time: Duration,
        items_completed: usize,
    ) -> Option<BatchSizeRecommendation> {
        let sample = self.monitor.sample();
        let pressure = self.monitor.current_pressure();

        self.history.push(BatchPerformanceMetric {
            processing_time,
            memory_usage: sample.usage_ratio,
            cpu_usage: sample.cpu_usage,
            batch_size,
            throughput: BatchPerformanceMetric::throughput_of(items_completed, processing_time),
            pressure,
        });

        let current = batch_size.clamp(self.config.min_batch_size, self.config.max_batch_size);
        if current != self.recommended {
            // The size was changed outside the advisor; follow it
            self.recommended = current;
            self.smoothed = current as f64;
        }

        self.evaluate(current, pressure)
    }

    /// Clears history and cooldown and returns to the default size.
    pub fn reset(&mut self) {
        self.history.clear();
        self.recommended = self.config.default_batch_size;
        self.smoothed = self.config.default_batch_size as f64;
        self.last_recommendation = None;
        self.adjustments = 0;
        debug!("Batch size advisor reset to {}", self.recommended);
    }

    fn evaluate(&mut self, current: usize, pressure: MemoryPressureLevel) -> Option<BatchSizeRecommendation> {
        if self.history.len() < WARMUP_SAMPLES {
            debug!("Advisor warming up ({}/{} batches)", self.history.len(), WARMUP_SAMPLES);
            return None;
        }

        if pressure == MemoryPressureLevel::Critical {
            let target = (current / 2).max(self.config.min_batch_size);
            if target == current {
                return None;
            }
            self.smoothed = target as f64;
            return Some(self.publish(target, AdjustmentReason::CriticalPressure));
        }

        if let Some(last) = self.last_recommendation {
            if last.elapsed() < self.config.cooldown_period {
                debug!("Advisor cooling down, keeping batch size {}", current);
                return None;
            }
        }

        let (target, reason) = self.predicted_target(current).or_else(|| self.heuristic_target(pressure))?;

        let alpha = self.config.smoothing_factor;
        let (min, max) = (self.config.min_batch_size as f64, self.config.max_batch_size as f64);
        self.smoothed = (self.smoothed * (1.0 - alpha) + target * alpha).clamp(min, max);

        if (self.smoothed - self.recommended as f64).abs() < DEAD_BAND {
            debug!(
                "Advisor target {:.1} ({}) within dead-band of {}",
                self.smoothed, reason, self.recommended
            );
            return None;
        }

        let size = (self.smoothed.round() as usize).clamp(self.config.min_batch_size, self.config.max_batch_size);
        Some(self.publish(size, reason))
    }

    fn predicted_target(&self, current: usize) -> Option<(f64, AdjustmentReason)> {
        if !self.config.use_predictor {
            return None;
        }
        let prediction = self.predictor.predict(&self.history.to_vec(), current)?;
        if prediction.confidence > PREDICTOR_CONFIDENCE_THRESHOLD {
            Some((prediction.batch_size as f64, AdjustmentReason::Predictor))
        } else {
            debug!(
                "Predictor confidence {:.2} too low, using heuristics",
                prediction.confidence
            );
            None
        }
    }

    fn heuristic_target(&self, pressure: MemoryPressureLevel) -> Option<(f64, AdjustmentReason)> {
        let size = self.smoothed;
        let Trends { throughput, memory, processing_time } = self.history.trends();

        match pressure {
            MemoryPressureLevel::Normal => {
                if throughput > 0.0 && memory < 0.1 {
                    let damping = (1.0 - size / self.config.max_batch_size as f64).max(0.5);
                    let step = MAX_STEP.min(size * 0.2 * damping);
                    Some((size + step, AdjustmentReason::ThroughputRising))
                } else if throughput < 0.0 && processing_time > 0.2 {
                    Some((size - MAX_STEP.min(size * 0.1), AdjustmentReason::ThroughputFalling))
                } else {
                    None
                }
            }
            MemoryPressureLevel::Medium => {
                (throughput <= 0.0 || memory >= 0.05)
                    .then(|| (size - MAX_STEP.min(size * 0.15), AdjustmentReason::MediumPressure))
            }
            MemoryPressureLevel::High => Some((size - MAX_STEP.min(size * 0.3), AdjustmentReason::HighPressure)),
            // Handled by the override in `evaluate`
            MemoryPressureLevel::Critical => None,
        }
    }

    fn publish(&mut self, size: usize, reason: AdjustmentReason) -> BatchSizeRecommendation {
        let recommendation = BatchSizeRecommendation {
            previous: self.recommended,
            recommended: size,
            reason,
        };
        self.recommended = size;
        self.last_recommendation = Some(Instant::now());
        self.adjustments += 1;
        info!(
            "Recommending batch size {} -> {} ({})",
            recommendation.previous, recommendation.recommended, reason
        );
        recommendation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualSampler, MemoryThresholds};
    use crate::processing::batch::predictor::Prediction;

    fn advisor(config: AdvisorConfiguration) -> (ManualSampler, BatchSizeAdvisor) {
        let sampler = ManualSampler::new(1_000_000);
        sampler.set_ratio(0.2);
        let monitor = MemoryMonitor::with_sampler(sampler.clone(), MemoryThresholds::default());
        (sampler, BatchSizeAdvisor::new(config, monitor))
    }

    fn responsive() -> AdvisorConfiguration {
        AdvisorConfiguration {
            smoothing_factor: 1.0,
            cooldown_period: Duration::ZERO,
            ..AdvisorConfiguration::default()
        }
    }

    /// Records `count` batches of `size` items, each faster than the last.
    fn record_rising(advisor: &mut BatchSizeAdvisor, count: usize) -> Vec<Option<BatchSizeRecommendation>> {
        (0..count)
            .map(|i| {
                let size = advisor.recommended_batch_size();
                advisor.record_result(size, Duration::from_millis(5_000 - 500 * i as u64), size)
            })
            .collect()
    }

    #[test]
    fn warming_never_recommends() {
        let (sampler, mut advisor) = advisor(responsive());
        assert_eq!(advisor.state(), AdvisorState::Idle);
        sampler.set_ratio(0.99);
        assert_eq!(advisor.record_result(50, Duration::from_secs(1), 50), None);
        assert_eq!(advisor.record_result(50, Duration::from_secs(1), 50), None);
        assert_eq!(advisor.state(), AdvisorState::Warming);
        assert_eq!(advisor.recommended_batch_size(), 50);
    }

    #[test]
    fn rising_throughput_grows_within_damping() {
        let (_, mut advisor) = advisor(responsive());
        let results = record_rising(&mut advisor, 3);
        let rec = results[2].expect("third batch should produce advice");
        assert_eq!(rec.previous, 50);
        assert_eq!(rec.recommended, 55);
        assert_eq!(rec.reason, AdjustmentReason::ThroughputRising);
        assert_eq!(advisor.state(), AdvisorState::Active);
    }

    #[test]
    fn critical_pressure_bypasses_cooldown() {
        let (sampler, mut advisor) = advisor(AdvisorConfiguration {
            smoothing_factor: 1.0,
            cooldown_period: Duration::from_secs(3_600),
            ..AdvisorConfiguration::default()
        });
        let results = record_rising(&mut advisor, 3);
        assert!(results[2].is_some());

        // Cooling down: advisory paths stay quiet
        assert_eq!(record_rising(&mut advisor, 1)[0], None);

        sampler.set_ratio(0.95);
        let rec = advisor.record_result(55, Duration::from_secs(1), 55).expect("critical override");
        assert_eq!(rec.reason, AdjustmentReason::CriticalPressure);
        assert!(rec.recommended <= 55 / 2);
    }

    #[test]
    fn small_steps_accumulate_past_dead_band() {
        let (_, mut advisor) = advisor(AdvisorConfiguration {
            smoothing_factor: 0.3,
            cooldown_period: Duration::ZERO,
            ..AdvisorConfiguration::default()
        });
        let results = record_rising(&mut advisor, 8);
        let published: Vec<_> = results.into_iter().flatten().collect();
        assert!(!published.is_empty());
        assert!(published[0].recommended >= 55);
    }

    #[test]
    fn high_pressure_shrinks() {
        let (sampler, mut advisor) = advisor(responsive());
        sampler.set_ratio(0.85);
        let results: Vec<_> = (0..3).map(|_| advisor.record_result(50, Duration::from_secs(1), 50)).collect();
        let rec = results[2].expect("high pressure advice");
        assert_eq!(rec.reason, AdjustmentReason::HighPressure);
        assert_eq!(rec.recommended, 45);
    }

    #[test]
    fn recommendations_stay_in_bounds() {
        let (sampler, mut advisor) = advisor(AdvisorConfiguration {
            min_batch_size: 10,
            max_batch_size: 60,
            default_batch_size: 58,
            smoothing_factor: 1.0,
            cooldown_period: Duration::ZERO,
            ..AdvisorConfiguration::default()
        });
        record_rising(&mut advisor, 6);
        assert!(advisor.recommended_batch_size() <= 60);

        sampler.set_ratio(0.99);
        for _ in 0..10 {
            let size = advisor.recommended_batch_size();
            advisor.record_result(size, Duration::from_secs(1), size);
            assert!((10..=60).contains(&advisor.recommended_batch_size()));
        }
        assert_eq!(advisor.recommended_batch_size(), 10);
    }

    #[test]
    fn history_is_bounded_by_window() {
        let (_, mut advisor) = advisor(AdvisorConfiguration {
            history_window_size: 4,
            ..responsive()
        });
        for _ in 0..9 {
            advisor.record_result(50, Duration::from_secs(1), 50);
        }
        assert_eq!(advisor.history().len(), 4);
    }

    struct Fixed(Prediction);

    impl BatchSizePredictor for Fixed {
        fn predict(&self, _history: &[BatchPerformanceMetric], _current: usize) -> Option<Prediction> {
            Some(self.0)
        }
    }

    #[test]
    fn confident_predictor_wins_over_heuristics() {
        let (_, advisor) = advisor(AdvisorConfiguration { use_predictor: true, ..responsive() });
        let mut advisor = advisor.with_predictor(Fixed(Prediction { batch_size: 120, confidence: 0.9 }));
        let results: Vec<_> = (0..3).map(|_| advisor.record_result(50, Duration::from_secs(1), 50)).collect();
        let rec = results[2].expect("predictor advice");
        assert_eq!(rec.reason, AdjustmentReason::Predictor);
        assert_eq!(rec.recommended, 120);
    }

    #[test]
    fn unsure_predictor_falls_back() {
        let (sampler, advisor) = advisor(AdvisorConfiguration { use_predictor: true, ..responsive() });
        let mut advisor = advisor.with_predictor(Fixed(Prediction { batch_size: 120, confidence: 0.5 }));
        sampler.set_ratio(0.85);
        let results: Vec<_> = (0..3).map(|_| advisor.record_result(50, Duration::from_secs(1), 50)).collect();
        assert_eq!(results[2].map(|r| r.reason), Some(AdjustmentReason::HighPressure));
    }

    #[test]
    fn reset_restores_defaults() {
        let (_, mut advisor) = advisor(responsive());
        record_rising(&mut advisor, 4);
        assert_ne!(advisor.recommended_batch_size(), 50);
        advisor.reset();
        assert_eq!(advisor.state(), AdvisorState::Idle);
        assert_eq!(advisor.recommended_batch_size(), 50);
        assert_eq!(advisor.adjustments(), 0);
    }
}
