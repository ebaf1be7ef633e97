//! Error types for the migrator.
//!
//! Provides a hierarchy of error types using `thiserror` for ergonomic error handling.
//! [`BatchError`] is the batch engine's own taxonomy; [`MigratorError`] wraps it for
//! the application layer.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Outcomes of the batch loop that are not a plain success.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Cancellation was observed at a loop-safe point.
    #[error("Batch processing cancelled after {processed} items")]
    Cancelled { processed: usize },

    /// A batch ran past its soft deadline. Advisory only, never returned from a run.
    #[error("Batch {index} exceeded its soft deadline ({elapsed_ms}ms > {limit_ms}ms)")]
    BatchTimeoutWarning {
        index: usize,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    /// The caller's work function failed for a whole batch. Fatal to the run.
    #[error("Batch {index} failed: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl BatchError {
    pub fn batch_failed(index: usize, source: impl Into<anyhow::Error>) -> Self {
        Self::BatchFailed {
            index,
            source: source.into(),
        }
    }

    /// Whether this outcome stops the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BatchFailed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A run that stopped early, together with every result produced before the stop.
pub struct PartialRun<R> {
    pub error: BatchError,
    pub results: Vec<R>,
}

impl<R> PartialRun<R> {
    pub fn new(error: BatchError, results: Vec<R>) -> Self {
        Self { error, results }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }

    pub fn into_parts(self) -> (BatchError, Vec<R>) {
        (self.error, self.results)
    }
}

impl<R> fmt::Debug for PartialRun<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialRun")
            .field("error", &self.error)
            .field("results", &format!("<{} results>", self.results.len()))
            .finish()
    }
}

impl<R> fmt::Display for PartialRun<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} partial results kept)", self.error, self.results.len())
    }
}

impl<R> std::error::Error for PartialRun<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<R> From<PartialRun<R>> for BatchError {
    fn from(run: PartialRun<R>) -> Self {
        run.error
    }
}

/// A platform memory read that could not be completed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    /// The platform API is missing or returned nothing usable
    #[error("Memory statistics unavailable: {0}")]
    Unavailable(String),
    /// The current process could not be located
    #[error("Current process not found: {0}")]
    ProcessNotFound(String),
}

/// Main error type for the migrator application.
#[derive(Error, Debug)]
pub enum MigratorError {
    /// Settings could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// File IO error
    #[error("IO error: {0}")]
    IO(String),

    /// Source collection could not be scanned
    #[error("Scan error: {path}: {message}")]
    Scan { path: PathBuf, message: String },

    /// The batch loop stopped early
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Convenience result type for migrator operations.
pub type MigratorResult<T> = Result<T, MigratorError>;

// Helper methods for error creation
impl MigratorError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn io<T: Into<String>>(msg: T) -> Self {
        Self::IO(msg.into())
    }

    pub fn scan(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Scan {
            path: path.into(),
            message: msg.into(),
        }
    }
}

// Convert std::io::Error to MigratorError
impl From<io::Error> for MigratorError {
    fn from(err: io::Error) -> Self {
        Self::IO(err.to_string())
    }
}

impl From<serde_json::Error> for MigratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
