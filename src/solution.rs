//! Solution-scoped cache: the tiered store plus snapshot-diff invalidation
//! for one analyzed solution root.
//!
//! Several solutions may share a cache root. Each keeps its entries under
//! `<cache root>/<solution id>/`, so equal keys from different solutions never
//! collide and clearing one solution leaves the others alone. The storage
//! quota still applies to the cache root as a whole.
//!
//! # Example
//!
//! ```rust,no_run
//! use solution_cache::config::CacheConfig;
//! use solution_cache::solution::SolutionCacheManager;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> solution_cache::errors::Result<()> {
//! let manager = SolutionCacheManager::open("/work/App", CacheConfig::default()).await?;
//! let cancel = CancellationToken::new();
//! manager.initialize(&cancel).await?;
//!
//! let graph: Option<Vec<String>> = manager
//!     .get_or_compute("callgraph:Core", ["src/Core/Service.cs"], None, &cancel, |_| async {
//!         Ok::<_, std::io::Error>(Some(vec!["Service.Run".to_string()]))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::cache::content_cache::{CompressedContentCache, MaintenanceReport};
use crate::cache::io_permits::IoPermits;
use crate::cache::maintenance::{MaintenanceHandle, PeriodicTask};
use crate::cache::stats::{utilization, HealthReport};
use crate::cache::storage_quota::{CleanupReport, StorageQuotaManager};
use crate::cache::tiered::{Cacheable, TieredCacheStore};
use crate::config::CacheConfig;
use crate::errors::{CacheError, FactoryError, Result};
use crate::snapshot::dependencies::{normalize_dependencies, DependencyRegistry};
use crate::snapshot::invalidator::{InvalidationReport, SnapshotDiffInvalidator};
use crate::snapshot::store::{solution_id, SnapshotStore};
use crate::snapshot::{ChangeSet, Snapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of diffing and invalidating against the prior snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub had_history: bool,
    pub changes: ChangeSet,
    pub invalidated: InvalidationReport,
}

#[derive(Debug)]
pub struct SolutionCacheManager {
    solution_root: PathBuf,
    cache_root: PathBuf,
    entries_root: PathBuf,
    config: CacheConfig,
    store: Arc<TieredCacheStore>,
    quota: Arc<StorageQuotaManager>,
    dependencies: Arc<DependencyRegistry>,
    invalidator: SnapshotDiffInvalidator,
    shutdown: CancellationToken,
    background: Mutex<Vec<MaintenanceHandle>>,
}

impl SolutionCacheManager {
    /// Open the cache for `solution_root`, creating the cache root if needed.
    /// Call [`initialize`](Self::initialize) before serving lookups so stale
    /// entries from a previous run are invalidated.
    pub async fn open(solution_root: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let requested = solution_root.as_ref();
        let solution_root = tokio::fs::canonicalize(requested)
            .await
            .map_err(|e| CacheError::io(e, requested, "resolve solution root"))?;
        let cache_root = config.resolve_cache_root();
        let entries_root = cache_root.join(solution_id(&solution_root));
        let permits = IoPermits::new(config.effective_io_permits());

        let quota = Arc::new(StorageQuotaManager::new(
            &cache_root,
            config.quota.clone(),
            permits.clone(),
        ));
        let durable = CompressedContentCache::open(
            &entries_root,
            config.durable.clone(),
            permits.clone(),
            Some(Arc::clone(&quota)),
        )
        .await?;
        let store = Arc::new(TieredCacheStore::new(
            durable,
            &config.volatile,
            config.single_flight,
        ));

        let dependencies = Arc::new(DependencyRegistry::new());
        let invalidator = SnapshotDiffInvalidator::new(
            &solution_root,
            config.snapshot.clone(),
            SnapshotStore::new(&cache_root),
            permits,
            Arc::clone(&dependencies),
        )?;

        log::info!(
            "Opened solution cache for {} at {}",
            solution_root.display(),
            entries_root.display()
        );

        Ok(Self {
            solution_root,
            cache_root,
            entries_root,
            config,
            store,
            quota,
            dependencies,
            invalidator,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn solution_root(&self) -> &Path {
        &self.solution_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Directory holding this solution's durable entries
    pub fn entries_root(&self) -> &Path {
        &self.entries_root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &TieredCacheStore {
        &self.store
    }

    /// Load the prior snapshot, invalidate whatever changed since and save a
    /// new baseline
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<RefreshReport> {
        let had_history = self.invalidator.initialize().await;
        let mut report = self.refresh(cancel).await?;
        report.had_history = had_history;
        Ok(report)
    }

    /// Diff against the current baseline, invalidate and save the hashes
    /// that were diffed as the new one
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport> {
        let detection = self.invalidator.detect_changes(cancel).await?;
        let invalidated = self.invalidator.invalidate(&detection.changes, &self.store).await;
        self.invalidator.commit(detection.hashes).await?;
        Ok(RefreshReport {
            had_history: true,
            changes: detection.changes,
            invalidated,
        })
    }

    /// Diff against the saved baseline without invalidating or saving
    pub async fn pending_changes(&self, cancel: &CancellationToken) -> Result<ChangeSet> {
        if self.invalidator.prior().is_none() {
            self.invalidator.initialize().await;
        }
        Ok(self.invalidator.detect_changes(cancel).await?.changes)
    }

    /// Return the cached value for `key` or compute it. When the value is
    /// present, `dependencies` (absolute or relative to the solution root)
    /// become the key's dependency set. `ttl` of `None` applies the durable
    /// default.
    pub async fn get_or_compute<T, D, P, F, Fut, E>(
        &self,
        key: &str,
        dependencies: D,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Option<T>>
    where
        T: Cacheable,
        D: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Into<FactoryError>,
    {
        let value = self.store.get_or_compute(key, ttl, cancel, factory).await?;
        if value.is_some() {
            self.register_dependencies(key, dependencies).await;
        }
        Ok(value)
    }

    pub async fn get<T: Cacheable>(&self, key: &str) -> Option<T> {
        self.store.get(key).await
    }

    /// Store `value` in both tiers and record its dependencies. A refused
    /// write stores nothing and leaves the previous registration in place.
    pub async fn set<T, D, P>(&self, key: &str, value: &T, dependencies: D, ttl: Option<Duration>) -> Result<()>
    where
        T: Cacheable,
        D: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.store.set(key, value, ttl).await?;
        self.register_dependencies(key, dependencies).await;
        Ok(())
    }

    /// Remove `key` from both tiers and forget its dependencies
    pub async fn remove(&self, key: &str) -> bool {
        let registered = self.dependencies.remove(key);
        self.store.remove(key).await || registered
    }

    /// Replace the dependency set of `key`; missing files are dropped
    pub async fn register_dependencies<D, P>(&self, key: &str, dependencies: D)
    where
        D: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<PathBuf> = dependencies
            .into_iter()
            .map(|path| path.as_ref().to_path_buf())
            .collect();
        if paths.is_empty() {
            return;
        }
        let base = self.solution_root.clone();
        let files = match tokio::task::spawn_blocking(move || normalize_dependencies(paths, &base)).await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Resolving dependencies of {} failed: {}", key, e);
                return;
            }
        };
        if !files.is_empty() {
            log::debug!("{} depends on {} files", key, files.len());
            self.dependencies.register(key, files);
        }
    }

    pub fn dependencies_of(&self, key: &str) -> Option<Vec<PathBuf>> {
        self.dependencies
            .get(key)
            .map(|files| files.into_iter().collect())
    }

    pub async fn save_snapshot(&self, cancel: &CancellationToken) -> Result<Snapshot> {
        self.invalidator.save_snapshot(cancel).await
    }

    /// One durable-tier maintenance pass
    pub async fn maintain(&self) -> Result<MaintenanceReport> {
        self.store.maintain().await
    }

    /// One quota sweep over the cache root, then drop index records for
    /// entries the sweep deleted
    pub async fn cleanup_storage(&self, cancel: &CancellationToken) -> Result<CleanupReport> {
        sweep(&self.quota, &self.store, cancel).await
    }

    pub async fn health(&self) -> HealthReport {
        let durable = self.store.durable();
        let quota = match self.quota.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("Quota statistics unavailable: {}", e);
                None
            }
        };

        HealthReport {
            solution_root: self.solution_root.display().to_string(),
            cache_root: self.cache_root.display().to_string(),
            statistics: self.store.statistics(),
            durable_entries: durable.entry_count(),
            durable_bytes: durable.total_bytes(),
            durable_max_bytes: durable.max_bytes(),
            utilization: utilization(durable.total_bytes(), durable.max_bytes()),
            volatile_entries: self.store.volatile_len(),
            tracked_files: self.invalidator.tracked_files(),
            registered_dependencies: self.dependencies.len(),
            quota,
            last_cleanup: self.quota.last_cleanup().await,
        }
    }

    /// Empty both tiers and forget every dependency
    pub async fn clear(&self) -> Result<usize> {
        self.dependencies.clear();
        self.store.clear().await
    }

    /// Start the maintenance ticker and the quota sweeper
    pub fn start_background(&self) {
        let mut background = self.background.lock();
        if !background.is_empty() {
            return;
        }

        let store = Arc::clone(&self.store);
        let maintenance = PeriodicTask::new("cache-maintenance", self.config.durable.maintenance_interval())
            .spawn(&self.shutdown, move |_| {
                let store = Arc::clone(&store);
                async move {
                    if let Err(e) = store.maintain().await {
                        log::warn!("Cache maintenance failed: {}", e);
                    }
                }
            });

        let quota = Arc::clone(&self.quota);
        let store = Arc::clone(&self.store);
        let sweeper = PeriodicTask::new("quota-sweep", self.config.quota.sweep_interval())
            .spawn(&self.shutdown, move |cancel| {
                let quota = Arc::clone(&quota);
                let store = Arc::clone(&store);
                async move {
                    match sweep(&quota, &store, &cancel).await {
                        Ok(_) => {}
                        Err(CacheError::Cancelled) => log::debug!("Quota sweep cancelled"),
                        Err(e) => log::warn!("Quota sweep failed: {}", e),
                    }
                }
            });

        background.push(maintenance);
        background.push(sweeper);
    }

    /// Stop background tasks and persist the metadata index
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let handles: Vec<MaintenanceHandle> = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            handle.stop().await;
        }
        self.store.durable().flush().await
    }
}

async fn sweep(
    quota: &StorageQuotaManager,
    store: &TieredCacheStore,
    cancel: &CancellationToken,
) -> Result<CleanupReport> {
    let report = quota.cleanup(cancel).await?;
    if report.deleted_count > 0 {
        store.durable().reconcile().await?;
    }
    Ok(report)
}
