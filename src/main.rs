// This is the command-line entry point for the media migrator.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use media_migrator_lib::commands::{migrate_with_monitor, DirectoryImporter, MigrationConfig};
use media_migrator_lib::core::{LogSink, MigrationProgress};
use media_migrator_lib::memory::{MemoryMonitor, SystemSampler};
use media_migrator_lib::processing::batch::{OrderStrategy, RunStatus, RunSummary};
use media_migrator_lib::utils::{scan_media, MigratorResult};

/// Failures listed after a run before the rest are only counted.
const MAX_LISTED_FAILURES: usize = 10;

#[derive(Parser)]
#[command(name = "media-migrator")]
#[command(about = "Migrate a media collection into a library under a memory budget")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Directory holding the collection to migrate
    source: PathBuf,

    /// Library directory to import into
    destination: PathBuf,

    /// JSON settings file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Check every item without writing anything
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    min_batch_size: Option<usize>,

    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Item order: none, timestamp-asc, timestamp-desc, size-asc, size-desc, random
    #[arg(long)]
    order: Option<OrderStrategy>,

    /// Process photos, videos and sidecars as separate groups
    #[arg(long)]
    group_by_type: bool,

    /// Hand the whole collection to the importer in one go
    #[arg(long)]
    no_batching: bool,

    /// Cleanup pause between batches, in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Memory budget in MiB that pressure is measured against
    #[arg(long)]
    memory_budget_mb: Option<u64>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut MigrationConfig) {
        let batch = &mut config.batch;
        if let Some(size) = self.batch_size {
            batch.batch_size = size;
        }
        if let Some(min) = self.min_batch_size {
            batch.min_batch_size = min;
        }
        if let Some(max) = self.max_batch_size {
            batch.max_batch_size = max;
        }
        if let Some(order) = self.order {
            batch.order_strategy = order;
        }
        if let Some(ms) = self.pause_ms {
            batch.pause_between_batches = Duration::from_millis(ms);
        }
        batch.group_items_by_type |= self.group_by_type;
        batch.is_enabled &= !self.no_batching;
        if self.memory_budget_mb.is_some() {
            config.memory_budget_mb = self.memory_budget_mb;
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .with_ansi(true)
        .with_writer(std::io::stdout)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("=== Media Migrator Starting ===");

    match run(cli).await {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(RunStatus::Cancelled) => ExitCode::from(130),
        Ok(RunStatus::Failed) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> MigratorResult<RunStatus> {
    let mut config = match &cli.config {
        Some(path) => MigrationConfig::load(path).await?,
        None => MigrationConfig::default(),
    };
    cli.apply_overrides(&mut config);
    debug!("Effective settings: {:?}", config);

    let items = scan_media(&cli.source).await?;
    info!("Found {} items in {}", items.len(), cli.source.display());

    let sampler = match config.memory_budget_bytes() {
        Some(budget) => SystemSampler::with_budget(budget),
        None => SystemSampler::new(),
    };
    let monitor = MemoryMonitor::with_sampler(sampler, config.batch.memory_thresholds);
    let importer = Arc::new(DirectoryImporter::new(&cli.destination).dry_run(cli.dry_run));
    let progress = MigrationProgress::shared();

    let interrupt = Arc::clone(&progress);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current item");
            interrupt.lock().cancel();
        }
    });

    let advisor_config = config.advisor_configuration();
    let report = migrate_with_monitor(
        items,
        importer,
        config.batch,
        advisor_config,
        monitor,
        Arc::new(LogSink),
        progress,
    )
    .await;

    println!("{}", report.summary);
    println!(
        "Imported {} items ({}), {} failed",
        report.imported(),
        RunSummary::format_bytes(report.bytes_imported()),
        report.failed()
    );
    for failure in report.failures().take(MAX_LISTED_FAILURES) {
        println!(
            "  └── {}: {}",
            failure.source_path.display(),
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    if report.failed() > MAX_LISTED_FAILURES {
        println!("  └── ... and {} more", report.failed() - MAX_LISTED_FAILURES);
    }
    if let Some(error) = &report.error {
        warn!("Run stopped early: {}", error);
    }

    Ok(report.status)
}
