//! Persistence of one snapshot per solution root.
//!
//! Snapshots live at `<cache root>/.snapshots/<solution id>.json`, where the
//! id is the first 16 hex characters of the SHA-256 of the solution path.
//! A missing or unreadable snapshot means "no prior history".

use super::Snapshot;
use crate::cache::key::key_digest;
use crate::errors::{CacheError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory under the cache root holding snapshots
pub const SNAPSHOT_DIR: &str = ".snapshots";

/// Stable identifier for a solution root
pub fn solution_id(root: &Path) -> String {
    let mut digest = key_digest(&root.to_string_lossy());
    digest.truncate(16);
    digest
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: cache_root.join(SNAPSHOT_DIR),
        }
    }

    pub fn path_for(&self, solution_root: &Path) -> PathBuf {
        self.dir.join(format!("{}.json", solution_id(solution_root)))
    }

    pub async fn load(&self, solution_root: &Path) -> Option<Snapshot> {
        let path = self.path_for(solution_root);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Cannot read snapshot {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Snapshot>(&content) {
            Ok(snapshot) if snapshot.root_path == solution_root => Some(snapshot),
            Ok(snapshot) => {
                log::warn!(
                    "Snapshot {} belongs to {}, ignoring",
                    path.display(),
                    snapshot.root_path.display()
                );
                None
            }
            Err(e) => {
                log::warn!("Snapshot {} is corrupted, ignoring: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the snapshot, replacing any previous one atomically
    pub async fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(e, &self.dir, "create directory"))?;

        let path = self.path_for(&snapshot.root_path);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;

        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| CacheError::io(e, &temp_path, "write"))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CacheError::io(e, &path, "rename"));
        }

        log::debug!(
            "Saved snapshot of {} files to {}",
            snapshot.file_count(),
            path.display()
        );
        Ok(path)
    }

    pub async fn remove(&self, solution_root: &Path) -> Result<bool> {
        let path = self.path_for(solution_root);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(e, &path, "remove")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FileDependencies, FileHashes};
    use tempfile::TempDir;

    fn snapshot(root: &str) -> Snapshot {
        let mut hashes = FileHashes::new();
        hashes.insert(PathBuf::from(format!("{}/A.cs", root)), "abc".into());
        Snapshot::new(root, hashes, FileDependencies::new())
    }

    #[test]
    fn test_solution_id_is_short_and_stable() {
        let id = solution_id(Path::new("/work/App"));
        assert_eq!(id.len(), 16);
        assert_eq!(id, solution_id(Path::new("/work/App")));
        assert_ne!(id, solution_id(Path::new("/work/Other")));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let original = snapshot("/work/App");

        let path = store.save(&original).await.unwrap();
        assert!(path.starts_with(dir.path().join(SNAPSHOT_DIR)));
        assert_eq!(store.load(Path::new("/work/App")).await, Some(original));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert_eq!(store.load(Path::new("/work/App")).await, None);
        assert!(!store.remove(Path::new("/work/App")).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.path_for(Path::new("/work/App"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ truncated").unwrap();

        assert_eq!(store.load(Path::new("/work/App")).await, None);
    }
}
