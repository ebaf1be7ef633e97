//! Core types for collection entries and their import results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::processing::batch::BatchItem;
use crate::utils::MediaKind;

/// One file of the source collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Path to the source file
    pub path: PathBuf,
    /// Kind detected from the extension
    pub kind: MediaKind,
    /// File size in bytes
    pub size_bytes: u64,
    /// Modification time in seconds since the Unix epoch, when known
    pub modified: Option<i64>,
}

impl MediaItem {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind, size_bytes: u64, modified: Option<i64>) -> Self {
        Self {
            path: path.into(),
            kind,
            size_bytes,
            modified,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

impl BatchItem for MediaItem {
    fn timestamp(&self) -> Option<i64> {
        self.modified
    }

    fn byte_size(&self) -> Option<u64> {
        Some(self.size_bytes)
    }

    fn group_key(&self) -> Option<String> {
        Some(self.kind.as_str().to_string())
    }
}

/// Result of importing one item into the destination library.
///
/// Item-level failures are reported here rather than raised, so one bad file
/// never fails its whole batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    /// Path to the source file
    pub source_path: PathBuf,
    /// Where the item landed in the library, if it was written
    pub destination: Option<PathBuf>,
    /// Bytes handled for this item
    pub bytes: u64,
    /// Whether the import succeeded
    pub success: bool,
    /// Error message if the import failed
    pub error: Option<String>,
}

impl ImportOutcome {
    pub fn imported(item: &MediaItem, destination: Option<PathBuf>) -> Self {
        Self {
            source_path: item.path.clone(),
            destination,
            bytes: item.size_bytes,
            success: true,
            error: None,
        }
    }

    pub fn failed(item: &MediaItem, error: impl Into<String>) -> Self {
        Self {
            source_path: item.path.clone(),
            destination: None,
            bytes: 0,
            success: false,
            error: Some(error.into()),
        }
    }
}
