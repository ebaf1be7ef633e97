// Module declarations in dependency order
pub mod commands;
pub mod core;
pub mod memory;
pub mod processing;
pub mod utils;

// Public exports for external consumers
pub use crate::core::{ImportOutcome, MediaItem, MigrationProgress, ProgressEvent, ProgressSink, SharedProgress};
pub use memory::{MemoryMonitor, MemoryPressureLevel, MemoryThresholds};
pub use processing::{AdvisorConfiguration, BatchItem, BatchProcessor, BatchSettings, BatchSizeAdvisor, OrderStrategy};
pub use utils::{BatchError, MigratorError, MigratorResult, PartialRun};
pub use commands::*;

// The binary entry point is in main.rs; this file is the library API it and the tests build on.
