//! Migration commands.
//!
//! - [`migrate_collection`]: run a scanned collection through the batch engine
//! - [`LibraryImporter`]: the destination library boundary, with [`DirectoryImporter`]
//! - [`MigrationConfig`]: settings file for a run

mod config;
mod importer;
mod migrate;

pub use config::MigrationConfig;
pub use importer::{DirectoryImporter, LibraryImporter};
pub use migrate::{migrate_collection, migrate_with_monitor, MigrationReport, MONITOR_INTERVAL};
