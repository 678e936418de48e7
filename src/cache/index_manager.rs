//! Metadata index for durable entries.
//!
//! The index maps the digest of each stored key to its sizes and timestamps.
//! Business logic lives in pure functions over [`CacheIndex`]; the
//! [`IndexManager`] wrapper only adds locking and persistence. The lock is a
//! synchronous `parking_lot` lock and is never held across an `.await`.

use crate::cache::byte_store::StoredFile;
use crate::errors::{CacheError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// File name of the persisted index inside the cache root
pub const INDEX_FILE_NAME: &str = ".index.json";

/// Metadata for one durable entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Logical key; unknown for entries synthesized from a bare file
    pub key: Option<String>,
    pub created_at: SystemTime,
    pub last_accessed: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub access_count: u64,
    /// Insertion order, used to break `last_accessed` ties
    pub sequence: u64,
}

impl EntryMetadata {
    pub fn new(key: &str, compressed_size: u64, uncompressed_size: u64, ttl: Option<Duration>) -> Self {
        let now = SystemTime::now();
        Self {
            key: Some(key.to_string()),
            created_at: now,
            last_accessed: now,
            expires_at: ttl.map(|ttl| now + ttl),
            compressed_size,
            uncompressed_size,
            access_count: 0,
            sequence: 0,
        }
    }

    /// Minimal metadata for a file that has no index record
    pub fn synthesized(file: &StoredFile, default_ttl: Option<Duration>) -> Self {
        Self {
            key: None,
            created_at: file.modified,
            last_accessed: file.modified,
            expires_at: default_ttl.map(|ttl| file.modified + ttl),
            compressed_size: file.size_bytes,
            uncompressed_size: 0,
            access_count: 0,
            sequence: 0,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

/// Index for tracking cache entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    pub entries: HashMap<String, EntryMetadata>,
    pub total_size: u64,
    pub next_sequence: u64,
    pub last_maintenance: Option<SystemTime>,
}

/// Statistics about the cache index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub entry_count: usize,
    pub total_size: u64,
}

/// Outcome of reconciling the index with the files on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub synthesized: usize,
    pub dropped: usize,
}

// Pure functions

fn recalculate_total_size(entries: &HashMap<String, EntryMetadata>) -> u64 {
    entries.values().map(|m| m.compressed_size).sum()
}

fn insert_entry(index: &mut CacheIndex, digest: String, mut metadata: EntryMetadata) {
    metadata.sequence = index.next_sequence;
    index.next_sequence += 1;
    if let Some(previous) = index.entries.insert(digest, metadata.clone()) {
        index.total_size = index.total_size.saturating_sub(previous.compressed_size);
    }
    index.total_size += metadata.compressed_size;
}

fn remove_entry(index: &mut CacheIndex, digest: &str) -> Option<EntryMetadata> {
    let removed = index.entries.remove(digest)?;
    index.total_size = index.total_size.saturating_sub(removed.compressed_size);
    Some(removed)
}

/// Digests of entries whose TTL has elapsed
pub fn expired_digests(index: &CacheIndex, now: SystemTime) -> Vec<String> {
    index
        .entries
        .iter()
        .filter(|(_, metadata)| metadata.is_expired(now))
        .map(|(digest, _)| digest.clone())
        .collect()
}

/// Entries ordered least recently accessed first, ties by insertion order
pub fn entries_by_recency(index: &CacheIndex) -> Vec<(String, EntryMetadata)> {
    let mut sorted: Vec<_> = index
        .entries
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    sorted.sort_by_key(|(_, metadata)| (metadata.last_accessed, metadata.sequence));
    sorted
}

/// Pick the oldest entries to delete until the total is at or below `target`
pub fn select_eviction_candidates(index: &CacheIndex, target_size: u64) -> Vec<String> {
    let mut remaining = index.total_size;
    let mut candidates = Vec::new();
    for (digest, metadata) in entries_by_recency(index) {
        if remaining <= target_size {
            break;
        }
        remaining = remaining.saturating_sub(metadata.compressed_size);
        candidates.push(digest);
    }
    candidates
}

/// Manages index operations behind a lock
#[derive(Debug, Default)]
pub struct IndexManager {
    index: RwLock<CacheIndex>,
}

impl IndexManager {
    pub fn new(index: CacheIndex) -> Self {
        Self {
            index: RwLock::new(index),
        }
    }

    /// Load a persisted index; missing or unreadable files yield an empty one
    pub async fn load(path: &Path) -> Self {
        let index = match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<CacheIndex>(&content) {
                Ok(mut index) => {
                    index.total_size = recalculate_total_size(&index.entries);
                    index
                }
                Err(e) => {
                    log::warn!("Cache index {} corrupted, rebuilding: {}", path.display(), e);
                    CacheIndex::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => {
                log::warn!("Failed to read cache index {}: {}", path.display(), e);
                CacheIndex::default()
            }
        };
        Self::new(index)
    }

    /// Persist the index atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = {
            let index = self.index.read();
            serde_json::to_vec(&*index)?
        };

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| CacheError::io(e, &temp_path, "write"))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| CacheError::io(e, path, "rename"))
    }

    /// Align the index with the entry files actually present
    pub fn reconcile(&self, files: &[StoredFile], default_ttl: Option<Duration>) -> Reconciliation {
        let mut index = self.index.write();
        let on_disk: HashMap<&str, &StoredFile> =
            files.iter().map(|f| (f.digest.as_str(), f)).collect();

        let stale: Vec<String> = index
            .entries
            .keys()
            .filter(|digest| !on_disk.contains_key(digest.as_str()))
            .cloned()
            .collect();
        for digest in &stale {
            remove_entry(&mut index, digest);
        }

        let mut synthesized = 0;
        // Size mismatches on known entries are left for the read path to flag
        for file in files {
            if index.entries.contains_key(&file.digest) {
                continue;
            }
            insert_entry(
                &mut index,
                file.digest.clone(),
                EntryMetadata::synthesized(file, default_ttl),
            );
            synthesized += 1;
        }

        index.total_size = recalculate_total_size(&index.entries);
        Reconciliation {
            synthesized,
            dropped: stale.len(),
        }
    }

    pub fn get(&self, digest: &str) -> Option<EntryMetadata> {
        self.index.read().entries.get(digest).cloned()
    }

    /// Insert or replace, assigning a fresh insertion sequence
    pub fn insert(&self, digest: String, metadata: EntryMetadata) {
        insert_entry(&mut self.index.write(), digest, metadata);
    }

    /// Insert only if absent; returns the record now in the index
    pub fn get_or_insert(&self, digest: &str, metadata: EntryMetadata) -> EntryMetadata {
        let mut index = self.index.write();
        if let Some(existing) = index.entries.get(digest) {
            return existing.clone();
        }
        insert_entry(&mut index, digest.to_string(), metadata);
        index.entries[digest].clone()
    }

    pub fn remove(&self, digest: &str) -> Option<EntryMetadata> {
        remove_entry(&mut self.index.write(), digest)
    }

    pub fn touch(&self, digest: &str) {
        if let Some(metadata) = self.index.write().entries.get_mut(digest) {
            metadata.last_accessed = SystemTime::now();
            metadata.access_count += 1;
        }
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.index.read().entries.contains_key(digest)
    }

    pub fn stats(&self) -> IndexStats {
        let index = self.index.read();
        IndexStats {
            entry_count: index.entries.len(),
            total_size: index.total_size,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.index.read().total_size
    }

    /// Size the index would have if `digest` were replaced by `incoming` bytes
    pub fn projected_size(&self, digest: &str, incoming: u64) -> u64 {
        let index = self.index.read();
        let existing = index
            .entries
            .get(digest)
            .map(|m| m.compressed_size)
            .unwrap_or(0);
        index.total_size.saturating_sub(existing) + incoming
    }

    pub fn expired(&self, now: SystemTime) -> Vec<String> {
        expired_digests(&self.index.read(), now)
    }

    pub fn eviction_candidates(&self, target_size: u64) -> Vec<String> {
        select_eviction_candidates(&self.index.read(), target_size)
    }

    /// Known logical keys
    pub fn keys(&self) -> Vec<String> {
        self.index
            .read()
            .entries
            .values()
            .filter_map(|m| m.key.clone())
            .collect()
    }

    pub fn digests(&self) -> Vec<String> {
        self.index.read().entries.keys().cloned().collect()
    }

    pub fn mark_maintained(&self) {
        self.index.write().last_maintenance = Some(SystemTime::now());
    }

    pub fn last_maintenance(&self) -> Option<SystemTime> {
        self.index.read().last_maintenance
    }

    pub fn clear(&self) {
        let mut index = self.index.write();
        index.entries.clear();
        index.total_size = 0;
    }
}
