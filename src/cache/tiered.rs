//! Durable + volatile tiers behind one get-or-compute API.
//!
//! Lookup order is durable first, then volatile. A volatile hit is written
//! through to the durable tier before it is returned, so the next process
//! finds it on disk. A factory result is written to both tiers.
//!
//! With single-flight enabled, concurrent callers for the same key wait on a
//! per-key async lock and re-check the tiers once they hold it, so the
//! factory runs once per key within a process. Without it, racing callers may
//! each invoke the factory; the final state is the same either way.

use super::content_cache::{CompressedContentCache, MaintenanceReport};
use super::stats::{CacheStatistics, TieredStatistics};
use super::volatile::VolatileCache;
use crate::config::VolatileConfig;
use crate::errors::{CacheError, FactoryError, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Values the tiered store can hold
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

pub struct TieredCacheStore {
    durable: CompressedContentCache,
    volatile: VolatileCache<String, ErasedValue>,
    volatile_ttl: Duration,
    stats: CacheStatistics,
    in_flight: Option<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for TieredCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCacheStore")
            .field("durable_root", &self.durable.root())
            .field("volatile_entries", &self.volatile.len())
            .field("single_flight", &self.in_flight.is_some())
            .finish()
    }
}

impl TieredCacheStore {
    pub fn new(durable: CompressedContentCache, volatile: &VolatileConfig, single_flight: bool) -> Self {
        Self {
            durable,
            volatile: VolatileCache::new(volatile.capacity, Some(volatile.ttl())),
            volatile_ttl: volatile.ttl(),
            stats: CacheStatistics::new(),
            in_flight: single_flight.then(DashMap::new),
        }
    }

    pub fn durable(&self) -> &CompressedContentCache {
        &self.durable
    }

    pub fn volatile_len(&self) -> usize {
        self.volatile.len()
    }

    fn volatile_get<T: Cacheable>(&self, key: &str) -> Option<T> {
        let erased = self.volatile.get(key)?;
        match erased.downcast::<T>() {
            Ok(value) => Some(T::clone(&value)),
            Err(_) => {
                log::debug!("Volatile entry for {} has a different type; ignoring", key);
                None
            }
        }
    }

    /// Durable then volatile; a volatile hit is promoted to the durable tier
    async fn lookup<T: Cacheable>(&self, key: &str) -> Option<T> {
        if let Some(value) = self.durable.get::<T>(key).await {
            return Some(value);
        }

        let value = self.volatile_get::<T>(key)?;
        match self.durable.set(key, &value, None).await {
            Ok(()) => log::debug!("Promoted {} to the durable tier", key),
            Err(e) => log::warn!("Failed to promote {}: {}", key, e),
        }
        Some(value)
    }

    /// Look up `key` in either tier without computing
    pub async fn get<T: Cacheable>(&self, key: &str) -> Option<T> {
        match self.lookup::<T>(key).await {
            Some(value) => {
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Return a cached value or compute it once and store it in both tiers.
    ///
    /// The factory is the only suspension point outside of cache I/O. A
    /// factory error is returned as [`CacheError::Factory`];
    /// `Ok(None)` is returned uncached. `ttl` of `None` applies the durable
    /// default. A computed value the durable tier refuses is returned but
    /// not cached.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Option<T>>
    where
        T: Cacheable,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Into<FactoryError>,
    {
        if let Some(value) = self.lookup::<T>(key).await {
            self.stats.record_hit();
            return Ok(Some(value));
        }

        let _guard = match &self.in_flight {
            Some(in_flight) => {
                let lock = Arc::clone(in_flight.entry(key.to_string()).or_default().value());
                let guard = lock.lock_owned().await;
                if let Some(value) = self.lookup::<T>(key).await {
                    self.stats.record_hit();
                    self.release(key);
                    return Ok(Some(value));
                }
                Some(guard)
            }
            None => None,
        };

        self.stats.record_miss();
        let result = self.compute(key, ttl, cancel, factory).await;
        self.release(key);
        result
    }

    async fn compute<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Option<T>>
    where
        T: Cacheable,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Into<FactoryError>,
    {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        log::debug!("Computing {}", key);
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

    /// Drop the single-flight lock for `key` once nobody else is waiting.
    /// The map and the caller's guard account for two references.
    fn release(&self, key: &str) {
        if let Some(in_flight) = &self.in_flight {
            in_flight.remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);
        }
    }

    /// Write to the durable tier, then the volatile tier. When the durable
    /// write fails neither tier holds the value and the error is returned.
    pub async fn set<T: Cacheable>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        if let Err(e) = self.durable.set(key, value, ttl).await {
            self.volatile.remove(key);
            return Err(e);
        }
        let volatile_ttl = ttl.map_or(self.volatile_ttl, |ttl| ttl.min(self.volatile_ttl));
        self.volatile
            .insert(key.to_string(), Arc::new(value.clone()), Some(volatile_ttl));
        Ok(())
    }

    /// Store only in the volatile tier with its configured TTL
    pub fn set_volatile<T: Cacheable>(&self, key: &str, value: T) {
        self.volatile
            .insert(key.to_string(), Arc::new(value), Some(self.volatile_ttl));
    }

    /// Remove from both tiers, counting an invalidation when anything was
    /// removed
    pub async fn remove(&self, key: &str) -> bool {
        let in_volatile = self.volatile.remove(key);
        let in_durable = self.durable.remove(key).await;
        let removed = in_volatile || in_durable;
        if removed {
            self.stats.record_invalidation();
            self.durable.record_invalidation();
        }
        removed
    }

    /// Keys known to either tier, sorted
    pub fn known_keys(&self) -> Vec<String> {
        let mut keys = self.durable.known_keys();
        keys.extend(self.volatile.keys());
        keys.sort();
        keys.dedup();
        keys
    }

    pub async fn maintain(&self) -> Result<MaintenanceReport> {
        let purged = self.volatile.purge_expired();
        if purged > 0 {
            log::debug!("Purged {} expired volatile entries", purged);
        }
        self.durable.maintain().await
    }

    /// Empty both tiers and reset every counter
    pub async fn clear(&self) -> Result<usize> {
        self.volatile.clear();
        self.stats.reset();
        self.durable.clear().await
    }

    pub fn statistics(&self) -> TieredStatistics {
        TieredStatistics {
            combined: self.stats.snapshot(),
            durable: self.durable.stats(),
            volatile: self.volatile.stats(),
        }
    }
}
