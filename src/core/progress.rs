use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use crate::memory::MemoryPressureLevel;

/// How many formatted event messages [`MigrationProgress`] keeps.
pub const RECENT_MESSAGE_CAPACITY: usize = 50;

/// Lifecycle and progress events published by the batch engine.
///
/// Batch indices are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    ProcessingStarted {
        total_items: usize,
    },
    BatchStarted {
        index: usize,
        total: usize,
    },
    BatchCompleted {
        index: usize,
        total: usize,
        items_processed: usize,
    },
    BatchError {
        index: usize,
        error: String,
    },
    MemoryWarning {
        level: MemoryPressureLevel,
        usage_percent: f64,
    },
    BatchSizeAdjusted {
        old: usize,
        new: usize,
        reason: String,
    },
    BatchTimeoutWarning {
        index: usize,
        elapsed_ms: u64,
        limit_ms: u64,
    },
    BatchCancelled {
        processed: usize,
    },
    ProcessingCompleted {
        total: usize,
        successful: usize,
        failed: usize,
    },
    EstimatedTimeRemaining {
        seconds: f64,
    },
}

impl ProgressEvent {
    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ProcessingCompleted { .. } | Self::BatchCancelled { .. } | Self::BatchError { .. }
        )
    }

    /// Whether observers should surface this event as a problem.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::MemoryWarning { .. } | Self::BatchTimeoutWarning { .. } | Self::BatchError { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessingStarted { total_items } => write!(f, "Processing {} items", total_items),
            Self::BatchStarted { index, total } => write!(f, "Batch {}/{} started", index, total),
            Self::BatchCompleted { index, total, items_processed } => {
                write!(f, "Batch {}/{} completed ({} items)", index, total, items_processed)
            }
            Self::BatchError { index, error } => write!(f, "Batch {} failed: {}", index, error),
            Self::MemoryWarning { level, usage_percent } => {
                write!(f, "Memory pressure {} ({:.1}% used)", level, usage_percent)
            }
            Self::BatchSizeAdjusted { old, new, reason } => {
                write!(f, "Batch size {} -> {} ({})", old, new, reason)
            }
            Self::BatchTimeoutWarning { index, elapsed_ms, limit_ms } => {
                write!(f, "Batch {} took {}ms (soft limit {}ms)", index, elapsed_ms, limit_ms)
            }
            Self::BatchCancelled { processed } => write!(f, "Cancelled after {} items", processed),
            Self::ProcessingCompleted { total, successful, failed } => {
                write!(f, "Completed {} items ({} successful, {} failed)", total, successful, failed)
            }
            Self::EstimatedTimeRemaining { seconds } => write!(f, "About {:.0}s remaining", seconds),
        }
    }
}

/// Receives progress events.
///
/// `emit` is called from the batch loop and must return promptly; sinks that
/// do slow work should hand events off to another task.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel; sending never blocks.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        if event.is_warning() {
            warn!("{}", event);
        } else if event.is_terminal() || matches!(event, ProgressEvent::ProcessingStarted { .. }) {
            info!("{}", event);
        } else {
            debug!("{}", event);
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Run-wide progress owned by the caller.
///
/// The batch processor writes to it; the caller creates it before the run and
/// reads it afterwards. Setting `is_cancelled` (via [`MigrationProgress::cancel`])
/// stops the run at the next loop-safe point.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub total_batches: usize,
    pub current_batch: usize,
    pub batch_size: usize,
    pub total_items: usize,
    pub processed_items: usize,
    /// Highest resident memory seen during the run, in bytes
    pub peak_memory_usage: u64,
    pub is_cancelled: bool,
    pub elapsed_time: Duration,
    pub recent_messages: VecDeque<String>,
}

/// Handle to [`MigrationProgress`] shared between the caller and the batch loop.
pub type SharedProgress = Arc<Mutex<MigrationProgress>>;

impl MigrationProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh progress record in a shareable handle.
    pub fn shared() -> SharedProgress {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&mut self) {
        self.is_cancelled = true;
    }

    pub fn push_message(&mut self, message: impl Into<String>) {
        if self.recent_messages.len() == RECENT_MESSAGE_CAPACITY {
            self.recent_messages.pop_front();
        }
        self.recent_messages.push_back(message.into());
    }

    /// Progress percentage (0-100)
    pub fn percentage(&self) -> usize {
        if self.total_items > 0 {
            (self.processed_items * 100) / self.total_items
        } else {
            0
        }
    }
}
