use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use crate::core::{MigrationProgress, ProgressEvent, ProgressSink, SharedProgress};
use crate::memory::{MemoryMonitor, MemoryPressureLevel};
use crate::utils::{BatchError, PartialRun};
use super::advisor::{AdjustmentReason, AdvisorState, BatchSizeAdvisor};
use super::config::{AdvisorConfiguration, BatchSettings, LiveBatchSize};
use super::ordering::{apply_order, group_by_key, BatchItem};
use super::report::{RunStatus, RunSummary};

/// Called at every inter-batch and inter-group pause, before sleeping.
pub type CleanupHook = Arc<dyn Fn() + Send + Sync>;

/// Bookkeeping for one `process` call.
struct RunState<R> {
    results: Vec<R>,
    summary: RunSummary,
    started: Instant,
    batch_time: Duration,
}

impl<R> RunState<R> {
    fn new(total_items: usize, batch_size: usize) -> Self {
        Self {
            results: Vec::new(),
            summary: RunSummary {
                total_items,
                initial_batch_size: batch_size,
                final_batch_size: batch_size,
                ..RunSummary::default()
            },
            started: Instant::now(),
            batch_time: Duration::ZERO,
        }
    }

    fn record_batch(&mut self, size: usize, dispatched: usize, elapsed: Duration) {
        let summary = &mut self.summary;
        summary.min_batch_size_used = if summary.batches == 0 { size } else { summary.min_batch_size_used.min(size) };
        summary.max_batch_size_used = summary.max_batch_size_used.max(size);
        summary.batches += 1;
        summary.dispatched_items += dispatched;
        self.batch_time += elapsed;
    }

    fn average_batch_time(&self) -> Duration {
        match u32::try_from(self.summary.batches) {
            Ok(batches) if batches > 0 => self.batch_time / batches,
            _ => Duration::ZERO,
        }
    }
}

/// Drives the batch loop: ordering, grouping, slicing, adaptive sizing,
/// pauses, cancellation and progress reporting.
///
/// Batches run strictly one after another. The work function may parallelize
/// internally; the loop itself never has two batches in flight.
pub struct BatchProcessor {
    settings: BatchSettings,
    batch_size: LiveBatchSize,
    monitor: MemoryMonitor,
    advisor: Option<BatchSizeAdvisor>,
    sink: Arc<dyn ProgressSink>,
    progress: SharedProgress,
    cleanup: Option<CleanupHook>,
    last_summary: Option<RunSummary>,
}

impl BatchProcessor {
    /// Builds a processor; settings are validated and, with adaptive sizing on,
    /// an advisor bounded by the same min/max is created on `monitor`.
    pub fn new(
        settings: BatchSettings,
        monitor: MemoryMonitor,
        sink: Arc<dyn ProgressSink>,
        progress: SharedProgress,
    ) -> Self {
        let settings = settings.validated();
        let advisor = settings
            .use_adaptive_sizing
            .then(|| BatchSizeAdvisor::new(AdvisorConfiguration::from_settings(&settings), monitor.clone()));

        debug!(
            "Creating BatchProcessor: size {} ({}-{}), adaptive: {}, order: {}, grouped: {}",
            settings.batch_size,
            settings.min_batch_size,
            settings.max_batch_size,
            settings.use_adaptive_sizing,
            settings.order_strategy,
            settings.group_items_by_type
        );

        Self {
            batch_size: LiveBatchSize::from_settings(&settings),
            settings,
            monitor,
            advisor,
            sink,
            progress,
            cleanup: None,
            last_summary: None,
        }
    }

    /// Replaces the default advisor. Ignored when adaptive sizing is off.
    pub fn with_advisor(mut self, advisor: BatchSizeAdvisor) -> Self {
        if self.settings.use_adaptive_sizing {
            self.advisor = Some(advisor);
        }
        self
    }

    pub fn with_cleanup_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.cleanup = Some(Arc::new(hook));
        self
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Handle to the live batch size; the loop re-reads it before every batch.
    pub fn batch_size(&self) -> LiveBatchSize {
        self.batch_size.clone()
    }

    pub fn advisor(&self) -> Option<&BatchSizeAdvisor> {
        self.advisor.as_ref()
    }

    pub fn progress(&self) -> SharedProgress {
        Arc::clone(&self.progress)
    }

    /// Summary of the most recent `process` call.
    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Runs `work` over `items` batch by batch.
    ///
    /// A failing batch aborts the run with [`BatchError::BatchFailed`];
    /// cancellation stops it with [`BatchError::Cancelled`]. Either way the
    /// results gathered so far come back in the [`PartialRun`].
    pub async fn process<T, R, F, Fut>(&mut self, items: Vec<T>, mut work: F) -> Result<Vec<R>, PartialRun<R>>
    where
        T: BatchItem,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<R>>>,
    {
        let total_items = items.len();
        let mut run = RunState::new(total_items, self.batch_size.get());
        self.reset_progress(total_items);

        if !self.settings.is_enabled {
            debug!("Batch processing disabled, handing {} items to one call", total_items);
            return self.process_whole(items, work, run).await;
        }

        if total_items == 0 {
            self.emit(ProgressEvent::ProcessingCompleted { total: 0, successful: 0, failed: 0 });
            return Ok(self.finish(run, RunStatus::Completed));
        }

        info!("Processing {} items in batches of {}", total_items, self.batch_size.get());
        self.emit(ProgressEvent::ProcessingStarted { total_items });

        let ordered = apply_order(items, self.settings.order_strategy, self.settings.shuffle_seed);
        let groups: Vec<Vec<T>> = if self.settings.group_items_by_type {
            group_by_key(ordered)
                .into_iter()
                .map(|(key, group)| {
                    debug!("Group {} has {} items", key.as_deref().unwrap_or("<untyped>"), group.len());
                    group
                })
                .collect()
        } else {
            vec![ordered]
        };
        run.summary.groups = groups.len();

        let mut remaining: Vec<usize> = groups.iter().map(Vec::len).collect();
        for (group_index, group) in groups.into_iter().enumerate() {
            if group_index > 0 {
                debug!("Starting group {}/{}", group_index + 1, remaining.len());
                self.pause_for_cleanup().await;
            }

            let mut pending = group.into_iter();
            while remaining[group_index] > 0 {
                if self.is_cancelled() {
                    return Err(self.cancelled(run));
                }

                let size = self.batch_size.get();
                let total = run.summary.batches + batches_left(&remaining, size);
                let index = run.summary.batches + 1;
                let batch: Vec<T> = pending.by_ref().take(size).collect();
                let dispatched = batch.len();
                remaining[group_index] -= dispatched;

                {
                    let mut progress = self.progress.lock();
                    progress.current_batch = index;
                    progress.total_batches = total;
                    progress.batch_size = size;
                }
                self.emit(ProgressEvent::BatchStarted { index, total });

                let started = Instant::now();
                let results = match work(batch).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!("Batch {}/{} failed: {:#}", index, total, e);
                        self.emit(ProgressEvent::BatchError { index, error: format!("{:#}", e) });
                        run.summary.dispatched_items += dispatched;
                        let error = BatchError::batch_failed(index, e);
                        let results = self.finish(run, RunStatus::Failed);
                        return Err(PartialRun::new(error, results));
                    }
                };
                let elapsed = started.elapsed();

                run.record_batch(size, dispatched, elapsed);
                run.results.extend(results);
                self.update_progress(&run, dispatched);
                self.emit(ProgressEvent::BatchCompleted { index, total, items_processed: dispatched });
                self.adapt_batch_size(&mut run, size, elapsed, dispatched);

                if let Some(limit) = self.settings.max_batch_processing_time {
                    if elapsed > limit {
                        let warning = BatchError::BatchTimeoutWarning {
                            index,
                            elapsed_ms: elapsed.as_millis() as u64,
                            limit_ms: limit.as_millis() as u64,
                        };
                        warn!("{}", warning);
                        run.summary.timeout_warnings += 1;
                        self.emit(ProgressEvent::BatchTimeoutWarning {
                            index,
                            elapsed_ms: elapsed.as_millis() as u64,
                            limit_ms: limit.as_millis() as u64,
                        });
                    }
                }

                self.warn_on_pressure(&mut run);

                // The work function may have stopped early inside the batch
                if self.is_cancelled() {
                    return Err(self.cancelled(run));
                }

                let left = batches_left(&remaining, self.batch_size.get());
                if left > 0 {
                    let seconds = run.average_batch_time().as_secs_f64() * left as f64;
                    self.emit(ProgressEvent::EstimatedTimeRemaining { seconds });
                }

                if remaining[group_index] > 0 {
                    self.pause_for_cleanup().await;
                }
            }
        }

        let successful = run.results.len();
        let failed = run.summary.dispatched_items.saturating_sub(successful);
        self.emit(ProgressEvent::ProcessingCompleted { total: total_items, successful, failed });
        Ok(self.finish(run, RunStatus::Completed))
    }

    async fn process_whole<T, R, F, Fut>(&mut self, items: Vec<T>, mut work: F, mut run: RunState<R>) -> Result<Vec<R>, PartialRun<R>>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<R>>>,
    {
        let total = items.len();
        let started = Instant::now();
        match work(items).await {
            Ok(results) => {
                run.record_batch(total, total, started.elapsed());
                run.results = results;
                self.update_progress(&run, total);
                if self.is_cancelled() {
                    return Err(self.cancelled(run));
                }
                let successful = run.results.len();
                self.emit(ProgressEvent::ProcessingCompleted {
                    total,
                    successful,
                    failed: total.saturating_sub(successful),
                });
                Ok(self.finish(run, RunStatus::Completed))
            }
            Err(e) => {
                warn!("Unbatched run failed: {:#}", e);
                self.emit(ProgressEvent::BatchError { index: 1, error: format!("{:#}", e) });
                run.summary.dispatched_items = total;
                let results = self.finish(run, RunStatus::Failed);
                Err(PartialRun::new(BatchError::batch_failed(1, e), results))
            }
        }
    }

    /// Feeds the finished batch to the advisor and applies any new size.
    ///
    /// While the advisor is still warming up, high or critical pressure scales
    /// the size down directly through the monitor's recommendation.
    fn adapt_batch_size(&mut self, run: &mut RunState<impl Sized>, size: usize, elapsed: Duration, items: usize) {
        let Some(advisor) = self.advisor.as_mut() else {
            // Keep the pressure reading fresh for warnings
            self.monitor.sample();
            return;
        };

        let (target, reason) = match advisor.record_result(size, elapsed, items) {
            Some(advice) => (advice.recommended, advice.reason),
            None if advisor.state() != AdvisorState::Active
                && self.monitor.current_pressure() >= MemoryPressureLevel::High =>
            {
                (self.monitor.recommended_batch_size(size), AdjustmentReason::PressureGuard)
            }
            None => return,
        };

        let applied = self.batch_size.set(target);
        if applied != size {
            run.summary.size_adjustments += 1;
            self.progress.lock().batch_size = applied;
            info!("Batch size {} -> {} ({})", size, applied, reason);
            self.emit(ProgressEvent::BatchSizeAdjusted {
                old: size,
                new: applied,
                reason: reason.to_string(),
            });
        }
    }

    fn warn_on_pressure(&self, run: &mut RunState<impl Sized>) {
        if !self.settings.show_memory_warnings {
            return;
        }
        let level = self.monitor.current_pressure();
        if level >= MemoryPressureLevel::Medium {
            run.summary.memory_warnings += 1;
            let usage_percent = self.monitor.last_sample().usage_percent();
            self.emit(ProgressEvent::MemoryWarning { level, usage_percent });
        }
    }

    async fn pause_for_cleanup(&self) {
        let pause = self.settings.pause_between_batches;
        if pause.is_zero() {
            return;
        }
        if let Some(hook) = &self.cleanup {
            hook();
        }
        tokio::time::sleep(pause).await;
    }

    fn is_cancelled(&self) -> bool {
        self.progress.lock().is_cancelled
    }

    fn cancelled<R>(&mut self, run: RunState<R>) -> PartialRun<R> {
        let processed = run.summary.dispatched_items;
        info!("Batch processing cancelled after {} items", processed);
        self.emit(ProgressEvent::BatchCancelled { processed });
        let results = self.finish(run, RunStatus::Cancelled);
        PartialRun::new(BatchError::Cancelled { processed }, results)
    }

    fn reset_progress(&self, total_items: usize) {
        let mut progress = self.progress.lock();
        let cancelled = progress.is_cancelled;
        let messages = std::mem::take(&mut progress.recent_messages);
        *progress = MigrationProgress {
            total_items,
            batch_size: self.batch_size.get(),
            total_batches: total_items.div_ceil(self.batch_size.get().max(1)),
            is_cancelled: cancelled,
            recent_messages: messages,
            ..MigrationProgress::default()
        };
    }

    fn update_progress<R>(&self, run: &RunState<R>, dispatched: usize) {
        let peak = self.monitor.peak_usage().max(self.monitor.last_sample().resident_bytes);
        let mut progress = self.progress.lock();
        progress.processed_items += dispatched;
        progress.batch_size = self.batch_size.get();
        progress.peak_memory_usage = progress.peak_memory_usage.max(peak);
        progress.elapsed_time = run.started.elapsed();
    }

    /// Publishes to the sink and keeps the formatted message on the progress record.
    fn emit(&self, event: ProgressEvent) {
        self.progress.lock().push_message(event.to_string());
        self.sink.emit(event);
    }

    fn finish<R>(&mut self, run: RunState<R>, status: RunStatus) -> Vec<R> {
        let RunState { results, mut summary, started, .. } = run;
        summary.status = status;
        summary.successful = results.len();
        summary.failed = summary.dispatched_items.saturating_sub(results.len());
        summary.elapsed = started.elapsed();
        summary.final_batch_size = self.batch_size.get();

        {
            let mut progress = self.progress.lock();
            progress.elapsed_time = summary.elapsed;
            summary.peak_memory_bytes = progress.peak_memory_usage.max(self.monitor.peak_usage());
        }

        if summary.total_items > 0 {
            info!("Batch run {}:\n{}", status, summary);
        } else {
            debug!("Batch run {} with no items", status);
        }
        self.last_summary = Some(summary);
        results
    }
}

/// Batches still needed for `remaining` items per group at `size` items per batch.
fn batches_left(remaining: &[usize], size: usize) -> usize {
    let size = size.max(1);
    remaining.iter().map(|n| n.div_ceil(size)).sum()
}
