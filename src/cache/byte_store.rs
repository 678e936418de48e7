//! Lowest-level key to blob persistence.
//!
//! Every blob lives at `<root>/<sha256(key)>.cache`. Writes go to a temporary
//! sibling first and are renamed into place, so readers either see the old
//! blob, the new blob, or nothing, never a half-written file.

use crate::cache::io_permits::IoPermits;
use crate::cache::key::{digest_from_file_name, entry_file_name, key_digest, ENTRY_EXTENSION};
use crate::errors::{CacheError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;

/// Suffix of in-flight temporary files
pub const TEMP_SUFFIX: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-system facts about a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub digest: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Digest-addressed blob store rooted at one directory
#[derive(Debug, Clone)]
pub struct ByteStore {
    root: PathBuf,
    permits: IoPermits,
}

impl ByteStore {
    pub fn new(root: impl Into<PathBuf>, permits: IoPermits) -> Self {
        Self {
            root: root.into(),
            permits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn permits(&self) -> &IoPermits {
        &self.permits
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(entry_file_name(key))
    }

    pub fn path_for_digest(&self, digest: &str) -> PathBuf {
        self.root.join(format!("{}.{}", digest, ENTRY_EXTENSION))
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::io(e, &self.root, "create directory"))
    }

    /// Read a blob; `Ok(None)` when it does not exist
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read_digest(&key_digest(key)).await
    }

    pub async fn read_digest(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for_digest(digest);
        let _permit = self.permits.acquire().await;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(e, &path, "read")),
        }
    }

    /// Stat a blob without reading it
    pub async fn stat_digest(&self, digest: &str) -> Result<Option<StoredFile>> {
        let path = self.path_for_digest(digest);
        let _permit = self.permits.acquire().await;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(StoredFile {
                digest: digest.to_string(),
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
                path,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(e, &path, "stat")),
        }
    }

    /// Atomically replace the blob for `key`
    pub async fn write(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.write_digest(&key_digest(key), bytes).await
    }

    pub async fn write_digest(&self, digest: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure_root().await?;

        let path = self.path_for_digest(digest);
        let temp_path = Self::temp_path_for(&path);
        let _permit = self.permits.acquire().await;

        if let Err(e) = fs::write(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CacheError::io(e, &temp_path, "write"));
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CacheError::io(e, &path, "rename"));
        }

        Ok(path)
    }

    /// Remove a blob; returns whether a file was deleted
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.remove_digest(&key_digest(key)).await
    }

    pub async fn remove_digest(&self, digest: &str) -> Result<bool> {
        let path = self.path_for_digest(digest);
        let _permit = self.permits.acquire().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(e, &path, "remove")),
        }
    }

    /// List every entry file directly under the root
    pub async fn list(&self) -> Result<Vec<StoredFile>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(e, &self.root, "list")),
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(CacheError::io(e, &self.root, "list")),
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let Some(digest) = digest_from_file_name(&name) else {
                continue;
            };

            // Files may vanish between listing and stat; skip them.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            files.push(StoredFile {
                digest: digest.to_string(),
                path: entry.path(),
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            });
        }

        Ok(files)
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}.{}{}", std::process::id(), counter, TEMP_SUFFIX));
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ByteStore {
        ByteStore::new(dir.path().join("entries"), IoPermits::new(4))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let path = store.write("graph:Core", b"payload").await.unwrap();
        assert!(path.ends_with(entry_file_name("graph:Core")));
        assert_eq!(
            store.read("graph:Core").await.unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).read("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write("a", b"one").await.unwrap();
        store.write("a", b"two").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(TEMP_SUFFIX));
        assert_eq!(store.read("a").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_remove_reports_existence() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write("k", b"v").await.unwrap();

        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write("k1", b"v1").await.unwrap();
        store.write("k2", b"value2").await.unwrap();
        std::fs::write(store.root().join(".last-cleanup"), "x").unwrap();
        std::fs::write(store.root().join("notes.txt"), "x").unwrap();

        let mut listed = store.list().await.unwrap();
        listed.sort_by_key(|f| f.size_bytes);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].digest, key_digest("k1"));
        assert_eq!(listed[1].size_bytes, 6);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list().await.unwrap().is_empty());
    }
}
