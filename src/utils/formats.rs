use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use crate::utils::MigratorError;

/// Broad media category of a collection entry, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    /// Metadata exported next to the media (e.g. `IMG_0001.jpg.json`)
    Sidecar,
    Other,
}

impl MediaKind {
    /// Get file extensions associated with this kind
    pub fn extensions(&self) -> &[&str] {
        match self {
            Self::Photo => &["jpg", "jpeg", "png", "heic", "heif", "gif", "webp", "tif", "tiff", "dng", "raw"],
            Self::Video => &["mp4", "mov", "m4v", "avi", "3gp", "mkv", "mts"],
            Self::Sidecar => &["json", "xmp"],
            Self::Other => &[],
        }
    }

    /// Check if the extension matches this kind
    pub fn matches_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.extensions().contains(&ext.as_str())
    }

    /// Whether entries of this kind are imported into the library
    pub fn is_media(&self) -> bool {
        matches!(self, Self::Photo | Self::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Sidecar => "sidecar",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = MigratorError;

    fn from_str(ext: &str) -> Result<Self, Self::Err> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        [Self::Photo, Self::Video, Self::Sidecar]
            .into_iter()
            .find(|kind| kind.matches_extension(&ext))
            .ok_or_else(|| MigratorError::config(format!("Unsupported media extension: {}", ext)))
    }
}

/// Get the media kind from a file path; unknown or missing extensions map to [`MediaKind::Other`]
pub fn kind_from_path(path: impl AsRef<Path>) -> MediaKind {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|ext| MediaKind::from_str(ext).ok())
        .unwrap_or(MediaKind::Other)
}
