use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use media_migrator_lib::core::{ChannelSink, MigrationProgress, ProgressEvent, SharedProgress};
use media_migrator_lib::memory::{ManualSampler, MemoryMonitor, MemoryThresholds};
use media_migrator_lib::processing::batch::{BatchItem, BatchProcessor, BatchSettings, OrderStrategy, RunStatus};
use media_migrator_lib::utils::BatchError;

struct Harness {
    sampler: ManualSampler,
    processor: BatchProcessor,
    progress: SharedProgress,
    events: UnboundedReceiver<ProgressEvent>,
}

impl Harness {
    fn new(settings: BatchSettings) -> Self {
        let sampler = ManualSampler::new(1_000_000);
        sampler.set_ratio(0.1);
        let monitor = MemoryMonitor::with_sampler(sampler.clone(), MemoryThresholds::default());
        let (sink, events) = ChannelSink::new();
        let progress = MigrationProgress::shared();
        let processor = BatchProcessor::new(settings, monitor, Arc::new(sink), Arc::clone(&progress));
        Self { sampler, processor, progress, events }
    }

    fn drain_events(&mut self) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

fn settings(batch_size: usize) -> BatchSettings {
    BatchSettings {
        batch_size,
        min_batch_size: 1,
        max_batch_size: 100,
        pause_between_batches: Duration::ZERO,
        ..BatchSettings::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Photo {
    id: usize,
    album: &'static str,
    bytes: u64,
}

impl BatchItem for Photo {
    fn byte_size(&self) -> Option<u64> {
        Some(self.bytes)
    }

    fn group_key(&self) -> Option<String> {
        Some(self.album.to_string())
    }
}

#[tokio::test]
async fn disabled_batching_is_one_work_call() {
    let items: Vec<u32> = (0..23).collect();
    let direct: Vec<u32> = items.iter().map(|n| n + 1).collect();

    let mut harness = Harness::new(BatchSettings { is_enabled: false, ..settings(5) });
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);

    let results = harness
        .processor
        .process(items, |batch: Vec<u32>| {
            *counter.lock() += 1;
            async move { anyhow::Ok(batch.into_iter().map(|n| n + 1).collect::<Vec<_>>()) }
        })
        .await
        .unwrap();

    assert_eq!(results, direct);
    assert_eq!(*calls.lock(), 1);
}

#[tokio::test]
async fn critical_pressure_after_first_batch_shrinks_the_next() {
    let mut harness = Harness::new(BatchSettings {
        batch_size: 10,
        min_batch_size: 2,
        max_batch_size: 100,
        pause_between_batches: Duration::ZERO,
        ..BatchSettings::default()
    });
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&sizes);
    let sampler = harness.sampler.clone();

    let results = harness
        .processor
        .process((0..25u32).collect(), |batch: Vec<u32>| {
            seen.lock().push(batch.len());
            sampler.set_ratio(0.95);
            async move { anyhow::Ok(batch) }
        })
        .await
        .unwrap();

    let sizes = sizes.lock().clone();
    assert_eq!(sizes[0], 10);
    assert!(sizes[1] <= 5, "second batch had {} items", sizes[1]);
    assert_eq!(sizes.iter().sum::<usize>(), 25);
    assert_eq!(results.len(), 25);
    assert!(sizes.iter().all(|&s| s >= 1));

    let events = harness.drain_events();
    let completed = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::BatchCompleted { index: 1, .. }))
        .unwrap();
    let adjusted = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::BatchSizeAdjusted { old: 10, new, .. } if *new <= 5))
        .unwrap();
    let warned = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::MemoryWarning { .. }))
        .unwrap();
    assert!(completed < adjusted && adjusted < warned, "{:?}", events);
}

#[tokio::test(start_paused = true)]
async fn batch_events_follow_the_work() {
    let mut harness = Harness::new(BatchSettings {
        use_adaptive_sizing: false,
        max_batch_processing_time: Some(Duration::from_millis(50)),
        ..settings(10)
    });

    harness
        .processor
        .process((0..4u32).collect(), |batch: Vec<u32>| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            anyhow::Ok(batch)
        })
        .await
        .unwrap();

    let events = harness.drain_events();
    assert!(
        matches!(
            events.as_slice(),
            [
                ProgressEvent::ProcessingStarted { total_items: 4 },
                ProgressEvent::BatchStarted { index: 1, total: 1 },
                ProgressEvent::BatchCompleted { index: 1, total: 1, items_processed: 4 },
                ProgressEvent::BatchTimeoutWarning { index: 1, limit_ms: 50, .. },
                ProgressEvent::ProcessingCompleted { total: 4, successful: 4, failed: 0 },
            ]
        ),
        "{:?}",
        events
    );
}

#[tokio::test]
async fn cancellation_during_the_last_batch_is_not_a_completion() {
    let mut harness = Harness::new(settings(10));
    let progress = Arc::clone(&harness.progress);

    let outcome = harness
        .processor
        .process((0..8u32).collect(), |batch: Vec<u32>| {
            progress.lock().cancel();
            // Stop partway like an importer that checks the flag per item
            async move { anyhow::Ok(batch.into_iter().take(3).collect::<Vec<_>>()) }
        })
        .await;

    let (error, results) = outcome.unwrap_err().into_parts();
    assert!(matches!(error, BatchError::Cancelled { processed: 8 }));
    assert_eq!(results, vec![0, 1, 2]);

    let events = harness.drain_events();
    assert_eq!(events.last(), Some(&ProgressEvent::BatchCancelled { processed: 8 }));
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::ProcessingCompleted { .. })));
    let summary = harness.processor.last_summary().unwrap();
    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!((summary.successful, summary.failed), (3, 5));
}

#[tokio::test]
async fn cancellation_during_an_unbatched_run_is_reported() {
    let mut harness = Harness::new(BatchSettings { is_enabled: false, ..settings(10) });
    let progress = Arc::clone(&harness.progress);

    let outcome = harness
        .processor
        .process((0..30u32).collect(), |batch: Vec<u32>| {
            progress.lock().cancel();
            async move { anyhow::Ok(batch.into_iter().take(12).collect::<Vec<_>>()) }
        })
        .await;

    let partial = outcome.unwrap_err();
    assert!(partial.is_cancelled());
    assert_eq!(partial.results.len(), 12);
    assert_eq!(harness.drain_events(), vec![ProgressEvent::BatchCancelled { processed: 30 }]);
}

#[tokio::test]
async fn cancellation_keeps_partial_results() {
    let mut harness = Harness::new(BatchSettings { use_adaptive_sizing: false, ..settings(10) });
    let progress = Arc::clone(&harness.progress);
    let dispatched = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&dispatched);

    let outcome = harness
        .processor
        .process((0..25u32).collect(), |batch: Vec<u32>| {
            let mut seen = counter.lock();
            *seen += batch.len();
            if *seen >= 20 {
                progress.lock().cancel();
            }
            async move { anyhow::Ok(batch) }
        })
        .await;

    let partial = outcome.unwrap_err();
    assert!(partial.is_cancelled());
    let (error, results) = partial.into_parts();
    assert!(matches!(error, BatchError::Cancelled { processed: 20 }));
    assert_eq!(results, (0..20).collect::<Vec<u32>>());
    assert!(results.len() <= *dispatched.lock());

    let events = harness.drain_events();
    assert_eq!(events.last(), Some(&ProgressEvent::BatchCancelled { processed: 20 }));
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::ProcessingCompleted { .. })));
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::BatchStarted { index: 3, .. })));
    assert_eq!(harness.processor.last_summary().map(|s| s.status), Some(RunStatus::Cancelled));
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let mut harness = Harness::new(settings(10));
    harness.progress.lock().cancel();

    let outcome = harness
        .processor
        .process((0..5u32).collect(), |batch: Vec<u32>| async move { anyhow::Ok(batch) })
        .await;

    let (error, results) = outcome.unwrap_err().into_parts();
    assert!(error.is_cancelled());
    assert!(results.is_empty());
}

#[tokio::test]
async fn empty_input_only_completes() {
    let mut harness = Harness::new(settings(10));

    let results = harness
        .processor
        .process(Vec::<u32>::new(), |batch: Vec<u32>| async move { anyhow::Ok(batch) })
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(
        harness.drain_events(),
        vec![ProgressEvent::ProcessingCompleted { total: 0, successful: 0, failed: 0 }]
    );
}

#[tokio::test]
async fn failing_batch_aborts_the_run() {
    let mut harness = Harness::new(settings(4));
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);

    let outcome = harness
        .processor
        .process((0..12u32).collect(), |batch: Vec<u32>| {
            let call = {
                let mut calls = counter.lock();
                *calls += 1;
                *calls
            };
            async move {
                if call == 2 {
                    bail!("library rejected batch");
                }
                Ok(batch)
            }
        })
        .await;

    let partial = outcome.unwrap_err();
    assert!(partial.error.is_fatal());
    assert!(matches!(partial.error, BatchError::BatchFailed { index: 2, .. }));
    assert_eq!(partial.results, vec![0, 1, 2, 3]);
    assert_eq!(*calls.lock(), 2);

    let events = harness.drain_events();
    assert!(matches!(events.last(), Some(ProgressEvent::BatchError { index: 2, error }) if error.contains("library rejected")));
}

#[tokio::test]
async fn completion_counts_missing_results_as_failed() {
    let mut harness = Harness::new(BatchSettings { use_adaptive_sizing: false, ..settings(10) });

    let results = harness
        .processor
        .process((0..25u32).collect(), |batch: Vec<u32>| async move {
            anyhow::Ok(batch.into_iter().filter(|n| n % 5 != 0).collect::<Vec<_>>())
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 20);
    let events = harness.drain_events();
    assert_eq!(events.first(), Some(&ProgressEvent::ProcessingStarted { total_items: 25 }));
    assert_eq!(events.get(1), Some(&ProgressEvent::BatchStarted { index: 1, total: 3 }));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::ProcessingCompleted { total: 25, successful: 20, failed: 5 })
    );
    let estimates = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::EstimatedTimeRemaining { .. }))
        .count();
    assert_eq!(estimates, 2);

    let progress = harness.progress.lock();
    assert_eq!(progress.processed_items, 25);
    assert_eq!(progress.current_batch, 3);
    assert!(!progress.recent_messages.is_empty());
}

fn albums() -> Vec<Photo> {
    let mut items = Vec::new();
    let layout = [("summer", 7), ("winter", 3), ("spring", 12)];
    let mut id = 0;
    // Interleave the albums so grouping has to reassemble them
    for round in 0..12 {
        for (album, count) in layout {
            if round < count {
                items.push(Photo { id, album, bytes: (id * 37 % 11) as u64 });
                id += 1;
            }
        }
    }
    items
}

async fn grouped_run(items: Vec<Photo>) -> Vec<Vec<Photo>> {
    let mut harness = Harness::new(BatchSettings { group_items_by_type: true, ..settings(5) });
    let batches = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&batches);

    harness
        .processor
        .process(items, |batch: Vec<Photo>| {
            seen.lock().push(batch.clone());
            async move { anyhow::Ok(batch) }
        })
        .await
        .unwrap();

    let summary = harness.processor.last_summary().cloned().unwrap();
    assert_eq!(summary.groups, 3);
    let batches = batches.lock().clone();
    batches
}

#[tokio::test]
async fn grouped_runs_are_complete_and_stable() {
    let first = grouped_run(albums()).await;
    let second = grouped_run(albums()).await;

    assert_eq!(first, second);
    assert_eq!(first.iter().map(Vec::len).sum::<usize>(), 22);
    for batch in &first {
        assert!(batch.iter().all(|p| p.album == batch[0].album), "mixed batch {:?}", batch);
    }

    let order: Vec<&str> = first.iter().map(|b| b[0].album).fold(Vec::new(), |mut acc, album| {
        if acc.last() != Some(&album) {
            acc.push(album);
        }
        acc
    });
    assert_eq!(order, vec!["summer", "winter", "spring"]);
}

#[tokio::test]
async fn size_ordering_feeds_largest_first() {
    let mut harness = Harness::new(BatchSettings {
        order_strategy: OrderStrategy::SizeDescending,
        ..settings(4)
    });

    let results = harness
        .processor
        .process(albums(), |batch: Vec<Photo>| async move { anyhow::Ok(batch) })
        .await
        .unwrap();

    let sizes: Vec<u64> = results.iter().map(|p| p.bytes).collect();
    assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test(start_paused = true)]
async fn groups_are_separated_by_pauses() {
    let mut harness = Harness::new(BatchSettings {
        group_items_by_type: true,
        pause_between_batches: Duration::from_millis(250),
        use_adaptive_sizing: false,
        ..settings(100)
    });

    let start = tokio::time::Instant::now();
    harness
        .processor
        .process(albums(), |batch: Vec<Photo>| async move { anyhow::Ok(batch) })
        .await
        .unwrap();

    // One batch per group, so every pause is an inter-group pause
    assert_eq!(harness.processor.last_summary().map(|s| s.batches), Some(3));
    assert!(start.elapsed() >= Duration::from_millis(500));
}
