//! Core application types and progress reporting.
//!
//! This module contains the fundamental types used throughout the application:
//! - [`MediaItem`]: One file of the source collection
//! - [`ImportOutcome`]: Result of importing one item
//! - [`MigrationProgress`]: Caller-owned progress shared with the batch loop
//! - [`ProgressEvent`] and [`ProgressSink`]: Structured event stream for observers

mod progress;
mod types;

pub use progress::{
    ChannelSink, LogSink, MigrationProgress, NullSink, ProgressEvent, ProgressSink, SharedProgress,
    RECENT_MESSAGE_CAPACITY,
};
pub use types::{ImportOutcome, MediaItem};
