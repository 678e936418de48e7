//! Durable, compressed, size-bounded cache tier.
//!
//! Every read re-validates the entry: file present, metadata known (or
//! synthesized from the file), not expired, size matching the index, gzip
//! marker present and payload decodable. Any failure removes the file and its
//! metadata and is reported as a miss, so one bad file never blocks other
//! keys and never surfaces as an error.

use super::byte_store::ByteStore;
use super::codec::{self, has_compressed_marker};
use super::index_manager::{EntryMetadata, IndexManager, Reconciliation, INDEX_FILE_NAME};
use super::io_permits::IoPermits;
use super::key::key_digest;
use super::stats::{CacheStatistics, StatisticsSnapshot};
use super::storage_quota::StorageQuotaManager;
use crate::config::DurableConfig;
use crate::errors::{CacheError, FactoryError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Size eviction stops at this fraction of `max_bytes`
pub const EVICTION_TARGET_RATIO: f64 = 0.8;

/// Result of validating one entry on read
enum Lookup<T> {
    Hit(T),
    Absent,
    Invalid { reason: String, corrupted: bool },
}

/// Outcome of one [`CompressedContentCache::maintain`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
    pub reconciled: Reconciliation,
    pub total_bytes: u64,
}

impl std::fmt::Display for MaintenanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} expired, {} evicted, {} orphans adopted, {} stale records dropped, {} bytes in use",
            self.expired,
            self.evicted,
            self.reconciled.synthesized,
            self.reconciled.dropped,
            self.total_bytes
        )
    }
}

/// Gzip-compressed JSON entries under one directory
#[derive(Debug)]
pub struct CompressedContentCache {
    store: ByteStore,
    index: IndexManager,
    index_path: PathBuf,
    config: DurableConfig,
    quota: Option<Arc<StorageQuotaManager>>,
    stats: CacheStatistics,
}

impl CompressedContentCache {
    /// Open the cache at `root`, loading the persisted index and reconciling
    /// it with the entry files actually present.
    pub async fn open(
        root: impl Into<PathBuf>,
        config: DurableConfig,
        permits: IoPermits,
        quota: Option<Arc<StorageQuotaManager>>,
    ) -> Result<Self> {
        let root = root.into();
        let store = ByteStore::new(&root, permits);
        store.ensure_root().await?;

        let index_path = root.join(INDEX_FILE_NAME);
        let index = IndexManager::load(&index_path).await;
        let files = store.list().await?;
        let reconciled = index.reconcile(&files, config.default_ttl());
        if reconciled != Reconciliation::default() {
            log::info!(
                "Reconciled cache index at {}: {} orphan files adopted, {} stale records dropped",
                root.display(),
                reconciled.synthesized,
                reconciled.dropped
            );
        }

        Ok(Self {
            store,
            index,
            index_path,
            config,
            quota,
            stats: CacheStatistics::new(),
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.config.default_ttl()
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.store.path_for(key)
    }

    /// Fetch and decode a live entry
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let digest = key_digest(key);
        match self.lookup(key, &digest).await {
            Lookup::Hit(value) => {
                self.index.touch(&digest);
                self.stats.record_hit();
                log::debug!("Durable hit: {}", key);
                Some(value)
            }
            Lookup::Absent => {
                self.stats.record_miss();
                None
            }
            Lookup::Invalid { reason, corrupted } => {
                let path = self.store.path_for_digest(&digest);
                if corrupted {
                    log::warn!("{}; removing entry for {}", CacheError::corrupted(&path, &reason), key);
                } else {
                    log::debug!("Dropping entry for {}: {}", key, reason);
                }
                self.discard(&digest).await;
                self.stats.record_miss();
                None
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, digest: &str) -> Lookup<T> {
        let file = match self.store.stat_digest(digest).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                self.index.remove(digest);
                return Lookup::Absent;
            }
            Err(e) => {
                log::warn!("Treating {} as a miss: {}", key, e);
                return Lookup::Absent;
            }
        };

        let mut synthesized = EntryMetadata::synthesized(&file, self.config.default_ttl());
        synthesized.key = Some(key.to_string());
        let metadata = self.index.get_or_insert(digest, synthesized);

        if metadata.is_expired(SystemTime::now()) {
            return Lookup::Invalid {
                reason: "expired".to_string(),
                corrupted: false,
            };
        }

        if file.size_bytes != metadata.compressed_size {
            return Lookup::Invalid {
                reason: format!(
                    "size {} does not match recorded {}",
                    file.size_bytes, metadata.compressed_size
                ),
                corrupted: true,
            };
        }

        let bytes = match self.store.read_digest(digest).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.index.remove(digest);
                return Lookup::Absent;
            }
            Err(e) => {
                log::warn!("Treating {} as a miss: {}", key, e);
                return Lookup::Absent;
            }
        };

        if !has_compressed_marker(&bytes) {
            return Lookup::Invalid {
                reason: "missing compression marker".to_string(),
                corrupted: true,
            };
        }

        match codec::decode(&bytes) {
            Ok(value) => Lookup::Hit(value),
            Err(e) => Lookup::Invalid {
                reason: e.to_string(),
                corrupted: true,
            },
        }
    }

    /// Delete file and metadata; a failed delete still drops the metadata so
    /// the next read re-validates from scratch.
    async fn discard(&self, digest: &str) -> bool {
        let had_metadata = self.index.remove(digest).is_some();
        match self.store.remove_digest(digest).await {
            Ok(removed) => removed || had_metadata,
            Err(e) => {
                log::warn!("Failed to remove cache entry: {}", e);
                had_metadata
            }
        }
    }

    /// Store `value`; `ttl` of `None` applies the configured default.
    ///
    /// Fails with [`CacheError::QuotaExceeded`] when the entry cannot fit the
    /// budget even after cleanup, in which case nothing is written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = codec::encode(value)?;
        let size = payload.compressed_len();
        let digest = key_digest(key);

        if size > self.config.max_bytes {
            log::warn!(
                "Entry {} ({} bytes) exceeds the durable budget of {} bytes",
                key,
                size,
                self.config.max_bytes
            );
            return Err(CacheError::quota_exceeded(size, self.config.max_bytes));
        }

        if let Some(quota) = &self.quota {
            if quota.ensure_space(size).await? {
                self.reconcile().await?;
            }
        }

        if self.index.projected_size(&digest, size) > self.config.max_bytes {
            let target = self.eviction_target().min(self.config.max_bytes - size);
            self.evict_to(target).await;
        }

        self.store.write_digest(&digest, &payload.bytes).await?;
        self.index.insert(
            digest,
            EntryMetadata::new(
                key,
                size,
                payload.uncompressed_len,
                ttl.or(self.config.default_ttl()),
            ),
        );
        log::debug!("Stored {} ({} bytes compressed)", key, size);
        Ok(())
    }

    /// Remove an entry; returns whether anything was removed
    pub async fn remove(&self, key: &str) -> bool {
        self.discard(&key_digest(key)).await
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// A storage failure after computing is logged; the computed value is
    /// still returned. `Ok(None)` from the factory is passed through uncached.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Into<FactoryError>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(Some(value));
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let computed = factory(cancel.clone())
            .await
            .map_err(|e| CacheError::factory(key, e))?;

        if let Some(value) = &computed {
            if let Err(e) = self.set(key, value, ttl).await {
                log::warn!("Computed value for {} was not cached: {}", key, e);
            }
        }
        Ok(computed)
    }

    fn eviction_target(&self) -> u64 {
        (self.config.max_bytes as f64 * EVICTION_TARGET_RATIO) as u64
    }

    /// Evict least recently accessed entries until at or below `target`
    async fn evict_to(&self, target: u64) -> usize {
        let candidates = self.index.eviction_candidates(target);
        let mut evicted = 0;
        for digest in &candidates {
            if self.discard(digest).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.record_evictions(evicted as u64);
            log::info!(
                "Evicted {} entries from {} ({} bytes remain)",
                evicted,
                self.root().display(),
                self.index.total_size()
            );
        }
        evicted
    }

    /// Reconcile with disk, drop expired entries, enforce the size budget and
    /// persist the index.
    pub async fn maintain(&self) -> Result<MaintenanceReport> {
        let reconciled = self.reconcile().await?;

        let expired_digests = self.index.expired(SystemTime::now());
        let mut expired = 0;
        for digest in &expired_digests {
            if self.discard(digest).await {
                expired += 1;
            }
        }

        let evicted = if self.index.total_size() > self.config.max_bytes {
            self.evict_to(self.eviction_target()).await
        } else {
            0
        };

        self.index.mark_maintained();
        self.flush().await?;

        let report = MaintenanceReport {
            expired,
            evicted,
            reconciled,
            total_bytes: self.index.total_size(),
        };
        log::info!("Maintenance of {}: {}", self.root().display(), report);
        Ok(report)
    }

    /// Align the index with the entry files on disk, e.g. after a quota
    /// sweep removed some of them
    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let files = self.store.list().await?;
        let reconciled = self.index.reconcile(&files, self.config.default_ttl());
        if reconciled.dropped > 0 {
            log::debug!(
                "Dropped {} index records for files removed under {}",
                reconciled.dropped,
                self.root().display()
            );
        }
        Ok(reconciled)
    }

    /// Delete every entry file and reset statistics
    pub async fn clear(&self) -> Result<usize> {
        let files = self.store.list().await?;
        let mut removed = 0;
        for file in &files {
            if self.store.remove_digest(&file.digest).await? {
                removed += 1;
            }
        }
        self.index.clear();
        self.stats.reset();
        self.flush().await?;
        log::info!("Cleared {} entries from {}", removed, self.root().display());
        Ok(removed)
    }

    /// Persist the metadata index
    pub async fn flush(&self) -> Result<()> {
        self.index.save(&self.index_path).await
    }

    /// Whether the index holds a non-expired record for `key`. The file is
    /// not validated; use [`get`](Self::get) for that.
    pub fn contains(&self, key: &str) -> bool {
        self.index
            .get(&key_digest(key))
            .is_some_and(|m| !m.is_expired(SystemTime::now()))
    }

    pub fn entry_count(&self) -> usize {
        self.index.stats().entry_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.index.total_size()
    }

    /// Logical keys with a known name; synthesized entries are omitted
    pub fn known_keys(&self) -> Vec<String> {
        self.index.keys()
    }

    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        self.index.get(&key_digest(key))
    }

    pub fn last_maintenance(&self) -> Option<SystemTime> {
        self.index.last_maintenance()
    }

    pub fn stats(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn record_invalidation(&self) {
        self.stats.record_invalidation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageQuota;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CallGraph {
        nodes: Vec<String>,
    }

    fn graph(n: usize) -> CallGraph {
        CallGraph {
            nodes: (0..n).map(|i| format!("Namespace.Type.Method{}", i)).collect(),
        }
    }

    fn config(max_bytes: u64) -> DurableConfig {
        DurableConfig {
            max_bytes,
            default_ttl_secs: None,
            maintenance_interval_secs: 600,
        }
    }

    async fn open(dir: &TempDir, max_bytes: u64) -> CompressedContentCache {
        CompressedContentCache::open(dir.path(), config(max_bytes), IoPermits::new(4), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_before_write_updates_index() {
        let dir = TempDir::new().unwrap();
        let entry_size = codec::encode(&graph(40)).unwrap().compressed_len();
        let quota = StorageQuota {
            max_bytes: entry_size * 3 / 2,
            min_free_bytes: 0,
            ..StorageQuota::default()
        };
        let permits = IoPermits::new(4);
        let manager = Arc::new(StorageQuotaManager::new(dir.path(), quota, permits.clone()));
        let cache = CompressedContentCache::open(dir.path(), config(1 << 20), permits, Some(manager))
            .await
            .unwrap();

        cache.set("graph:Old", &graph(40), None).await.unwrap();
        let old_path = cache.path_for("graph:Old");
        let idle = SystemTime::now() - Duration::from_secs(40 * 86_400);
        std::fs::File::options()
            .write(true)
            .open(&old_path)
            .unwrap()
            .set_times(std::fs::FileTimes::new().set_accessed(idle).set_modified(idle))
            .unwrap();

        cache.set("graph:New", &graph(40), None).await.unwrap();

        assert!(!old_path.exists());
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.total_bytes(), entry_size);
        assert!(!cache.contains("graph:Old"));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;

        cache.set("graph:Core", &graph(10), None).await.unwrap();
        assert_eq!(cache.get::<CallGraph>("graph:Core").await, Some(graph(10)));
        assert!(cache.contains("graph:Core"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;

        cache.set("k", &graph(1), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(cache.get::<CallGraph>("k").await, None);
        assert!(!cache.path_for("k").exists());
    }

    #[tokio::test]
    async fn test_garbage_file_is_removed_on_read() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;
        cache.set("k", &graph(5), None).await.unwrap();

        let path = cache.path_for("k");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        assert_eq!(cache.get::<CallGraph>("k").await, None);
        assert!(!path.exists());
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_orphan_file_gets_synthesized_metadata() {
        let dir = TempDir::new().unwrap();
        let payload = codec::encode(&graph(3)).unwrap();
        std::fs::write(
            dir.path().join(crate::cache::key::entry_file_name("orphan")),
            &payload.bytes,
        )
        .unwrap();

        let cache = open(&dir, 1 << 20).await;
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.get::<CallGraph>("orphan").await, Some(graph(3)));
        assert_eq!(
            cache.metadata("orphan").unwrap().key.as_deref(),
            None,
            "synthesized on open, before the key was known"
        );
    }

    #[tokio::test]
    async fn test_wrong_type_is_treated_as_corruption() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;
        cache.set("k", &"a string", None).await.unwrap();

        assert_eq!(cache.get::<CallGraph>("k").await, None);
        assert!(!cache.path_for("k").exists());
    }

    #[tokio::test]
    async fn test_oversized_entry_is_refused() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 16).await;

        let err = cache.set("big", &graph(100), None).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(!cache.path_for("big").exists());
    }

    #[tokio::test]
    async fn test_remove_reports_presence() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;
        cache.set("k", &graph(1), None).await.unwrap();

        assert!(cache.remove("k").await);
        assert!(!cache.remove("k").await);
    }

    #[tokio::test]
    async fn test_get_or_compute_invokes_factory_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_compute("k", None, &cancel, |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(Some(graph(2)))
                })
                .await
                .unwrap();
            assert_eq!(value, Some(graph(2)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_does_not_cache_none() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;

        let value: Option<CallGraph> = cache
            .get_or_compute("k", None, &CancellationToken::new(), |_| async {
                Ok::<_, std::io::Error>(None)
            })
            .await
            .unwrap();

        assert!(value.is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_factory_error_is_wrapped() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;

        let err = cache
            .get_or_compute("k", None, &CancellationToken::new(), |_| async {
                Err::<Option<CallGraph>, _>(std::io::Error::other("analysis failed"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Factory { .. }));
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, 1 << 20).await;
            cache.set("k", &graph(4), None).await.unwrap();
            cache.flush().await.unwrap();
        }

        let reopened = open(&dir, 1 << 20).await;
        assert_eq!(reopened.known_keys(), vec!["k".to_string()]);
        assert_eq!(reopened.get::<CallGraph>("k").await, Some(graph(4)));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1 << 20).await;
        cache.set("a", &graph(1), None).await.unwrap();
        cache.set("b", &graph(1), None).await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_bytes(), 0);
        assert!(dir.path().join(INDEX_FILE_NAME).exists());
    }
}
