//! Process memory sampling and pressure classification.
//!
//! - [`MemoryMonitor`]: periodic sampler, pressure level, peak tracking, change notifications
//! - [`MemoryThresholds`] / [`MemoryPressureLevel`]: ratio-to-level classification
//! - [`MemorySampler`]: platform seam, with [`SystemSampler`] and [`ManualSampler`]

mod monitor;
mod pressure;
mod sample;

pub use monitor::{MemoryMonitor, PressureChange, MIN_SAMPLE_INTERVAL};
pub use pressure::{MemoryPressureLevel, MemoryThresholds, MAX_THRESHOLD, MIN_THRESHOLD};
pub use sample::{ManualSampler, MemorySampler, MemoryUsageSample, SystemSampler};
