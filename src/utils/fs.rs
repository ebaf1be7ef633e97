use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, warn};
use crate::core::MediaItem;
use crate::utils::{MigratorError, MigratorResult, kind_from_path};

/// Get file size in bytes
pub async fn get_file_size(path: impl AsRef<Path>) -> MigratorResult<u64> {
    fs::metadata(path.as_ref())
        .await
        .map(|m| m.len())
        .map_err(|e| MigratorError::io(format!("Failed to get file size: {}", e)))
}

/// Check if directory exists
pub async fn dir_exists(path: impl AsRef<Path>) -> bool {
    fs::metadata(path.as_ref())
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Create the parent directory of `path` if it is missing (blocking; runs on the importer's threads)
pub fn ensure_parent_dir(path: impl AsRef<Path>) -> std::io::Result<()> {
    match path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Recursively collects every regular file under `root` as a [`MediaItem`].
///
/// Entries that cannot be read are skipped with a warning; only a missing or
/// unreadable `root` is an error. Output is sorted by path so repeated scans of
/// the same tree yield the same order.
pub async fn scan_media(root: impl AsRef<Path>) -> MigratorResult<Vec<MediaItem>> {
    let root = root.as_ref();
    if !dir_exists(root).await {
        return Err(MigratorError::scan(root, "not a readable directory"));
    }

    let mut items = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read entry in {}: {}", dir.display(), e);
                    break;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64);
                let kind = kind_from_path(&path);
                items.push(MediaItem::new(path, kind, metadata.len(), modified));
            }
        }
    }

    items.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Scanned {} files under {}", items.len(), root.display());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MediaKind;

    #[tokio::test]
    async fn scan_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2019/summer")).unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("2019/clip.mov"), b"movie!").unwrap();
        std::fs::write(dir.path().join("2019/summer/a.jpg.json"), b"{}").unwrap();

        let items = scan_media(dir.path()).await.unwrap();
        assert_eq!(items.len(), 3);

        let kinds: Vec<MediaKind> = items.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&MediaKind::Photo));
        assert!(kinds.contains(&MediaKind::Video));
        assert!(kinds.contains(&MediaKind::Sidecar));

        let clip = items.iter().find(|i| i.kind == MediaKind::Video).unwrap();
        assert_eq!(clip.size_bytes, 6);
        assert!(clip.modified.is_some());
    }

    #[tokio::test]
    async fn scan_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(scan_media(&missing).await, Err(MigratorError::Scan { .. })));
    }

    #[tokio::test]
    async fn file_size_reports_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.png");
        std::fs::write(&path, [0u8; 42]).unwrap();
        assert_eq!(get_file_size(&path).await.unwrap(), 42);
        assert!(get_file_size(dir.path().join("y.png")).await.is_err());
    }
}
