use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use super::pressure::{MemoryPressureLevel, MemoryThresholds};
use super::sample::{MemorySampler, MemoryUsageSample, SystemSampler};

/// Shortest sampling period the monitor will run at.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
/// Buffered pressure changes per subscriber before it starts lagging.
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Sent to subscribers whenever a sample lands in a different level than the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PressureChange {
    pub previous: MemoryPressureLevel,
    pub current: MemoryPressureLevel,
    pub usage_ratio: f64,
}

#[derive(Debug, Default)]
struct MonitorState {
    last_sample: MemoryUsageSample,
    pressure: MemoryPressureLevel,
    peak_resident: u64,
    failed_reads: u64,
}

struct Inner {
    sampler: Mutex<Box<dyn MemorySampler>>,
    thresholds: RwLock<MemoryThresholds>,
    state: Mutex<MonitorState>,
    changes: broadcast::Sender<PressureChange>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn sample(&self) -> MemoryUsageSample {
        let reading = self.sampler.lock().read();

        let sample = match reading {
            Ok(sample) => sample,
            Err(e) => {
                let mut state = self.state.lock();
                state.failed_reads += 1;
                if state.failed_reads == 1 {
                    warn!("Memory sampling failed, keeping last reading: {}", e);
                } else {
                    debug!("Memory sampling failed ({} in a row): {}", state.failed_reads, e);
                }
                return state.last_sample;
            }
        };

        let level = self.thresholds.read().classify(sample.usage_ratio);
        let previous = {
            let mut state = self.state.lock();
            let previous = state.pressure;
            state.last_sample = sample;
            state.pressure = level;
            state.peak_resident = state.peak_resident.max(sample.resident_bytes);
            state.failed_reads = 0;
            previous
        };

        if level != previous {
            debug!(
                "Memory pressure {} -> {} ({:.1}% used)",
                previous,
                level,
                sample.usage_percent()
            );
            // No receivers is fine; nobody has subscribed yet
            let _ = self.changes.send(PressureChange {
                previous,
                current: level,
                usage_ratio: sample.usage_ratio,
            });
        }

        sample
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Periodically samples process memory and classifies it into a [`MemoryPressureLevel`].
///
/// Cloning yields another handle to the same monitor; reads, threshold changes
/// and subscriptions are safe from any thread while the sampler task runs.
#[derive(Clone)]
pub struct MemoryMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("pressure", &self.current_pressure())
            .field("thresholds", &self.thresholds())
            .field("running", &self.is_running())
            .finish()
    }
}

impl MemoryMonitor {
    /// Monitor backed by the platform sampler.
    pub fn new(thresholds: MemoryThresholds) -> Self {
        Self::with_sampler(SystemSampler::new(), thresholds)
    }

    pub fn with_sampler(sampler: impl MemorySampler + 'static, thresholds: MemoryThresholds) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sampler: Mutex::new(Box::new(sampler)),
                thresholds: RwLock::new(thresholds.validated()),
                state: Mutex::new(MonitorState::default()),
                changes,
                task: Mutex::new(None),
            }),
        }
    }

    /// Starts sampling every `interval`, replacing any sampler task already running.
    ///
    /// Resets the peak usage. Must be called from within a Tokio runtime; outside
    /// one the monitor stays stopped and only on-demand [`Self::sample`] works.
    pub fn start(&self, interval: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Memory monitor not started, no async runtime: {}", e);
                return;
            }
        };

        let mut task = self.inner.task.lock();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        self.inner.state.lock().peak_resident = 0;

        let period = interval.max(MIN_SAMPLE_INTERVAL);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.sample();
            }
        }));
        info!("Memory monitor started ({}ms interval)", period.as_millis());
    }

    /// Stops periodic sampling. Does nothing when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
            info!("Memory monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Takes a reading now. Never fails: a failed platform read returns the
    /// previous sample and leaves the pressure level unchanged.
    pub fn sample(&self) -> MemoryUsageSample {
        self.inner.sample()
    }

    /// Level computed from the most recent successful sample.
    pub fn current_pressure(&self) -> MemoryPressureLevel {
        self.inner.state.lock().pressure
    }

    pub fn last_sample(&self) -> MemoryUsageSample {
        self.inner.state.lock().last_sample
    }

    /// Highest resident bytes observed since the last [`Self::start`].
    pub fn peak_usage(&self) -> u64 {
        self.inner.state.lock().peak_resident
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        *self.inner.thresholds.read()
    }

    /// Updates any subset of the thresholds; omitted ones keep their value.
    /// The result always satisfies `medium < high < critical`.
    pub fn configure_thresholds(
        &self,
        medium: Option<f64>,
        high: Option<f64>,
        critical: Option<f64>,
    ) -> MemoryThresholds {
        let mut thresholds = self.inner.thresholds.write();
        *thresholds = thresholds.with_overrides(medium, high, critical);
        debug!(
            "Memory thresholds set to {:.2}/{:.2}/{:.2}",
            thresholds.medium, thresholds.high, thresholds.critical
        );
        *thresholds
    }

    /// Batch size that is safe at the current pressure level, derived from `current`.
    pub fn recommended_batch_size(&self, current: usize) -> usize {
        self.current_pressure().scale_batch_size(current)
    }

    /// Receives a [`PressureChange`] for every level transition from now on.
    ///
    /// The sampler never waits on subscribers: one that falls more than a few
    /// dozen changes behind sees `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<PressureChange> {
        self.inner.changes.subscribe()
    }
}
