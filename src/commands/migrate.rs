//! Runs a whole collection through the batch engine into a library.

use std::sync::Arc;
use std::time::Duration;
use anyhow::anyhow;
use serde::Serialize;
use tracing::{debug, info, warn};
use crate::core::{ImportOutcome, MediaItem, ProgressSink, SharedProgress};
use crate::memory::MemoryMonitor;
use crate::processing::batch::{AdvisorConfiguration, BatchProcessor, BatchSettings, BatchSizeAdvisor, RunStatus, RunSummary};
use crate::utils::BatchError;
use super::importer::LibraryImporter;

/// Sampling period of the memory monitor during a migration.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Everything a migration produced, including runs that stopped early.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub status: RunStatus,
    pub outcomes: Vec<ImportOutcome>,
    pub summary: RunSummary,
    /// Why the run stopped early, if it did
    pub error: Option<String>,
}

impl MigrationReport {
    pub fn imported(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    pub fn bytes_imported(&self) -> u64 {
        self.outcomes.iter().filter(|o| o.success).map(|o| o.bytes).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ImportOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

/// Migrates `items` with a monitor on the platform sampler.
pub async fn migrate_collection(
    items: Vec<MediaItem>,
    importer: Arc<dyn LibraryImporter>,
    settings: BatchSettings,
    advisor_config: AdvisorConfiguration,
    sink: Arc<dyn ProgressSink>,
    progress: SharedProgress,
) -> MigrationReport {
    let monitor = MemoryMonitor::new(settings.memory_thresholds);
    migrate_with_monitor(items, importer, settings, advisor_config, monitor, sink, progress).await
}

/// Migrates `items` using the given monitor, which is started for the run and
/// stopped afterwards.
pub async fn migrate_with_monitor(
    items: Vec<MediaItem>,
    importer: Arc<dyn LibraryImporter>,
    settings: BatchSettings,
    advisor_config: AdvisorConfiguration,
    monitor: MemoryMonitor,
    sink: Arc<dyn ProgressSink>,
    progress: SharedProgress,
) -> MigrationReport {
    info!("Migrating {} items", items.len());
    monitor.start(MONITOR_INTERVAL);

    let advisor = BatchSizeAdvisor::new(advisor_config, monitor.clone());
    let mut processor =
        BatchProcessor::new(settings, monitor.clone(), sink, Arc::clone(&progress)).with_advisor(advisor);

    let work = |batch: Vec<MediaItem>| {
        let importer = Arc::clone(&importer);
        let progress = Arc::clone(&progress);
        async move { import_batch(batch, importer, progress).await }
    };

    let (status, outcomes, error) = match processor.process(items, work).await {
        Ok(outcomes) => (RunStatus::Completed, outcomes, None),
        Err(partial) => {
            let (error, outcomes) = partial.into_parts();
            let status = if error.is_cancelled() { RunStatus::Cancelled } else { RunStatus::Failed };
            (status, outcomes, Some(error))
        }
    };
    monitor.stop();

    let summary = processor.last_summary().cloned().unwrap_or_default();
    let report = MigrationReport {
        status,
        outcomes,
        summary,
        error: error.as_ref().map(BatchError::to_string),
    };
    info!(
        "Migration {}: {} imported, {} failed",
        report.status,
        report.imported(),
        report.failed()
    );
    report
}

/// Imports one batch item by item on the blocking pool, stopping early once
/// cancellation is requested.
async fn import_batch(
    batch: Vec<MediaItem>,
    importer: Arc<dyn LibraryImporter>,
    progress: SharedProgress,
) -> anyhow::Result<Vec<ImportOutcome>> {
    let mut outcomes = Vec::with_capacity(batch.len());

    for item in batch {
        if progress.lock().is_cancelled {
            debug!("Cancellation requested, leaving the rest of the batch");
            break;
        }

        let importer = Arc::clone(&importer);
        let outcome = tokio::task::spawn_blocking(move || importer.import(&item))
            .await
            .map_err(|e| anyhow!("Import task panicked: {e}"))?;

        if !outcome.success {
            warn!(
                "Import failed for {}: {}",
                outcome.source_path.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}
