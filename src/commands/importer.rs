//! Destination library boundary.

use std::path::{Path, PathBuf};
use tracing::debug;
use crate::core::{ImportOutcome, MediaItem};
use crate::utils::ensure_parent_dir;

/// Imports one item into the destination library.
///
/// Runs on the blocking pool. Failures go into the returned [`ImportOutcome`];
/// an import never fails its batch.
pub trait LibraryImporter: Send + Sync {
    fn import(&self, item: &MediaItem) -> ImportOutcome;
}

/// Copies items into `<root>/<kind>/<file name>`.
///
/// An existing file with the same name and size counts as already imported;
/// a different file with that name gets a numbered suffix. In dry-run mode
/// sources are only checked for readability and nothing is written.
#[derive(Debug, Clone)]
pub struct DirectoryImporter {
    root: PathBuf,
    dry_run: bool,
}

impl DirectoryImporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn destination_for(&self, item: &MediaItem) -> std::io::Result<(PathBuf, bool)> {
        let dir = self.root.join(item.kind.as_str());
        let name = item.file_name();
        let candidate = dir.join(&name);

        match std::fs::metadata(&candidate) {
            Ok(existing) if existing.len() == item.size_bytes => return Ok((candidate, true)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((candidate, false)),
            Err(e) => return Err(e),
        }

        let path = Path::new(&name);
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let extension = path.extension().map(|e| e.to_string_lossy().to_string());
        let mut n = 1;
        loop {
            let file_name = match &extension {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            let candidate = dir.join(file_name);
            match std::fs::metadata(&candidate) {
                Ok(existing) if existing.len() == item.size_bytes => return Ok((candidate, true)),
                Ok(_) => n += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((candidate, false)),
                Err(e) => return Err(e),
            }
        }
    }
}

impl LibraryImporter for DirectoryImporter {
    fn import(&self, item: &MediaItem) -> ImportOutcome {
        if let Err(e) = std::fs::metadata(&item.path) {
            return ImportOutcome::failed(item, format!("Source unreadable: {}", e));
        }

        if self.dry_run {
            debug!("Dry run: would import {}", item.path.display());
            return ImportOutcome::imported(item, None);
        }

        let (destination, already_present) = match self.destination_for(item) {
            Ok(found) => found,
            Err(e) => return ImportOutcome::failed(item, format!("Destination unavailable: {}", e)),
        };

        if already_present {
            debug!("Already imported: {}", destination.display());
            return ImportOutcome::imported(item, Some(destination));
        }

        let copied = ensure_parent_dir(&destination).and_then(|_| std::fs::copy(&item.path, &destination));
        match copied {
            Ok(_) => ImportOutcome::imported(item, Some(destination)),
            Err(e) => ImportOutcome::failed(item, format!("Copy to {} failed: {}", destination.display(), e)),
        }
    }
}
