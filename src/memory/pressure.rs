use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Coarse-grained memory pressure levels, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    #[default]
    Normal,
    Medium,
    High,
    Critical,
}

impl MemoryPressureLevel {
    /// Share of the current batch size that is still safe at this level.
    pub fn batch_size_factor(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Medium => 0.75,
            Self::High => 0.5,
            Self::Critical => 0.25,
        }
    }

    /// Scales `current` by [`Self::batch_size_factor`], flooring and never going below 1.
    pub fn scale_batch_size(&self, current: usize) -> usize {
        match self {
            Self::Normal => current.max(1),
            _ => ((current as f64 * self.batch_size_factor()).floor() as usize).max(1),
        }
    }
}

impl fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Lowest value any threshold may take.
pub const MIN_THRESHOLD: f64 = 0.50;
/// Highest value any threshold may take.
pub const MAX_THRESHOLD: f64 = 0.95;
/// Smallest gap kept between two adjacent thresholds.
const THRESHOLD_GAP: f64 = 0.01;

/// Usage-ratio boundaries for each [`MemoryPressureLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryThresholds {
    /// Enter `Medium` when `used / total >= medium`.
    pub medium: f64,
    /// Enter `High` when `used / total >= high`.
    pub high: f64,
    /// Enter `Critical` when `used / total >= critical`.
    pub critical: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            medium: 0.70,
            high: 0.80,
            critical: 0.90,
        }
    }
}

impl MemoryThresholds {
    /// Returns a copy with every threshold inside `[MIN_THRESHOLD, MAX_THRESHOLD]` and
    /// `medium < high < critical`. Out-of-order values are pushed upward, never rejected.
    pub fn validated(self) -> Self {
        let defaults = Self::default();
        let medium = sanitize(self.medium, defaults.medium)
            .clamp(MIN_THRESHOLD, MAX_THRESHOLD - 2.0 * THRESHOLD_GAP);
        let high = sanitize(self.high, defaults.high)
            .max(medium + THRESHOLD_GAP)
            .min(MAX_THRESHOLD - THRESHOLD_GAP);
        let critical = sanitize(self.critical, defaults.critical)
            .max(high + THRESHOLD_GAP)
            .min(MAX_THRESHOLD);

        let validated = Self { medium, high, critical };
        if validated != self {
            warn!(
                "Adjusted memory thresholds {:.2}/{:.2}/{:.2} -> {:.2}/{:.2}/{:.2}",
                self.medium, self.high, self.critical, medium, high, critical
            );
        }
        validated
    }

    /// Replaces the provided thresholds, keeps the rest, and re-validates.
    pub fn with_overrides(self, medium: Option<f64>, high: Option<f64>, critical: Option<f64>) -> Self {
        Self {
            medium: medium.unwrap_or(self.medium),
            high: high.unwrap_or(self.high),
            critical: critical.unwrap_or(self.critical),
        }
        .validated()
    }

    /// Maps a usage ratio onto a pressure level.
    pub fn classify(&self, usage_ratio: f64) -> MemoryPressureLevel {
        if usage_ratio >= self.critical {
            MemoryPressureLevel::Critical
        } else if usage_ratio >= self.high {
            MemoryPressureLevel::High
        } else if usage_ratio >= self.medium {
            MemoryPressureLevel::Medium
        } else {
            MemoryPressureLevel::Normal
        }
    }
}

fn sanitize(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}
