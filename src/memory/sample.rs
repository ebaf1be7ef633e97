//! Memory readings and the samplers that produce them.

use std::sync::Arc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::debug;
use crate::utils::SampleError;

/// Immutable snapshot of process memory, taken on every monitor tick.
///
/// Shared, compressed and purgeable figures are best-effort and `None` where
/// the platform does not report them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsageSample {
    /// Resident set size of this process, in bytes
    pub resident_bytes: u64,
    /// Virtual memory of this process, in bytes
    pub virtual_bytes: u64,
    pub shared_bytes: Option<u64>,
    pub compressed_bytes: Option<u64>,
    pub purgeable_bytes: Option<u64>,
    /// Denominator of the usage ratio: physical memory, or the configured budget
    pub total_bytes: u64,
    /// `resident_bytes / total_bytes`, 0 when the total is unknown
    pub usage_ratio: f64,
    /// Process CPU usage across all cores, 0..1
    pub cpu_usage: f64,
}

impl MemoryUsageSample {
    pub fn from_resident(resident_bytes: u64, total_bytes: u64) -> Self {
        Self {
            resident_bytes,
            total_bytes,
            usage_ratio: usage_ratio(resident_bytes, total_bytes),
            ..Self::default()
        }
    }

    pub fn usage_percent(&self) -> f64 {
        (self.usage_ratio * 100.0).clamp(0.0, 100.0)
    }
}

fn usage_ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

/// Source of memory readings for the monitor.
pub trait MemorySampler: Send {
    fn read(&mut self) -> Result<MemoryUsageSample, SampleError>;
}

/// Reads the current process's memory through `sysinfo`.
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
    budget_bytes: Option<u64>,
    cpu_count: f64,
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("Current pid unavailable, process memory will not be sampled: {}", e);
                None
            }
        };
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;

        Self {
            system: System::new(),
            pid,
            budget_bytes: None,
            cpu_count,
        }
    }

    /// Measures usage against a fixed budget instead of physical memory.
    pub fn with_budget(budget_bytes: u64) -> Self {
        let mut sampler = Self::new();
        sampler.budget_bytes = (budget_bytes > 0).then_some(budget_bytes);
        sampler
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemSampler {
    fn read(&mut self) -> Result<MemoryUsageSample, SampleError> {
        let pid = self
            .pid
            .ok_or_else(|| SampleError::ProcessNotFound("pid lookup failed".to_string()))?;

        self.system.refresh_memory();
        if !self.system.refresh_process(pid) {
            return Err(SampleError::ProcessNotFound(pid.to_string()));
        }
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| SampleError::ProcessNotFound(pid.to_string()))?;

        let total_bytes = self.budget_bytes.unwrap_or_else(|| self.system.total_memory());
        if total_bytes == 0 {
            return Err(SampleError::Unavailable("total memory reported as zero".to_string()));
        }

        let resident_bytes = process.memory();
        let cpu_usage = (process.cpu_usage() as f64 / (100.0 * self.cpu_count)).clamp(0.0, 1.0);

        Ok(MemoryUsageSample {
            resident_bytes,
            virtual_bytes: process.virtual_memory(),
            shared_bytes: shared_resident_bytes(),
            compressed_bytes: None,
            purgeable_bytes: None,
            total_bytes,
            usage_ratio: usage_ratio(resident_bytes, total_bytes),
            cpu_usage,
        })
    }
}

/// File-backed plus shmem resident pages, from `/proc/self/status`.
fn shared_resident_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let mut total_kb = None;
        for line in status.lines() {
            let line = line.trim_start();
            let rest = line
                .strip_prefix("RssFile:")
                .or_else(|| line.strip_prefix("RssShmem:"));
            if let Some(kb) = rest.and_then(|r| r.split_whitespace().next()).and_then(|kb| kb.parse::<u64>().ok()) {
                total_kb = Some(total_kb.unwrap_or(0) + kb);
            }
        }
        total_kb.map(|kb: u64| kb.saturating_mul(1024))
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[derive(Debug)]
struct ManualState {
    sample: MemoryUsageSample,
    failing: bool,
}

/// Sampler whose readings are set by hand.
///
/// Clones share state, so a test or replay can keep one handle and move the
/// other into a [`MemoryMonitor`](super::MemoryMonitor).
#[derive(Debug, Clone)]
pub struct ManualSampler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualSampler {
    /// Starts at zero usage of `total_bytes`.
    pub fn new(total_bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                sample: MemoryUsageSample::from_resident(0, total_bytes),
                failing: false,
            })),
        }
    }

    /// Sets resident memory to `ratio` of the total.
    pub fn set_ratio(&self, ratio: f64) {
        let mut state = self.state.lock();
        let total = state.sample.total_bytes;
        state.sample.resident_bytes = (total as f64 * ratio.max(0.0)) as u64;
        state.sample.usage_ratio = ratio;
    }

    pub fn set_cpu_usage(&self, cpu_usage: f64) {
        self.state.lock().sample.cpu_usage = cpu_usage;
    }

    pub fn set_sample(&self, sample: MemoryUsageSample) {
        self.state.lock().sample = sample;
    }

    /// Makes every following read fail until called again with `false`.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

impl MemorySampler for ManualSampler {
    fn read(&mut self) -> Result<MemoryUsageSample, SampleError> {
        let state = self.state.lock();
        if state.failing {
            return Err(SampleError::Unavailable("manual sampler set to fail".to_string()));
        }
        Ok(state.sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_zero_without_total() {
        let sample = MemoryUsageSample::from_resident(512, 0);
        assert_eq!(sample.usage_ratio, 0.0);
        assert_eq!(MemoryUsageSample::from_resident(256, 1024).usage_percent(), 25.0);
    }

    #[test]
    fn manual_sampler_clones_share_state() {
        let handle = ManualSampler::new(1_000);
        let mut sampler = handle.clone();
        handle.set_ratio(0.42);
        let sample = sampler.read().unwrap();
        assert_eq!(sample.resident_bytes, 420);
        assert_eq!(sample.usage_ratio, 0.42);

        handle.set_failing(true);
        assert!(sampler.read().is_err());
    }

    #[test]
    fn system_sampler_reads_this_process() {
        let mut sampler = SystemSampler::new();
        // Sandboxes may hide process info; a reading, when present, must be coherent
        if let Ok(sample) = sampler.read() {
            assert!(sample.total_bytes > 0);
            assert!(sample.usage_ratio >= 0.0);
            assert!((0.0..=1.0).contains(&sample.cpu_usage));
        }
    }

    #[test]
    fn budget_replaces_physical_total() {
        let mut sampler = SystemSampler::with_budget(1024 * 1024 * 1024);
        if let Ok(sample) = sampler.read() {
            assert_eq!(sample.total_bytes, 1024 * 1024 * 1024);
        }
    }
}
