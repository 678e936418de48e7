//! Bounded in-process cache with per-entry TTL.
//!
//! Recency is tracked with a monotonically increasing tick per access. The
//! `order` map keeps ticks sorted, so the least recently used entry is always
//! the first key of the map.

use super::stats::{CacheStatistics, StatisticsSnapshot};
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    expires_at: Option<Instant>,
    tick: u64,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Slot<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.map.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }

    fn pop_lru(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.map.remove(&key);
        Some(key)
    }
}

/// Capacity-bounded LRU map with optional expiry per entry
#[derive(Debug)]
pub struct VolatileCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    default_ttl: Option<Duration>,
    stats: CacheStatistics,
}

impl<K, V> VolatileCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
            stats: CacheStatistics::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Look up a live entry and mark it most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.map.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(slot) => slot.is_expired(now),
        };

        if expired {
            inner.remove(key);
            self.stats.record_miss();
            return None;
        }

        let tick = inner.bump();
        let slot = inner.map.get_mut(key)?;
        let old_tick = std::mem::replace(&mut slot.tick, tick);
        let value = slot.value.clone();
        if let Some(owner) = inner.order.remove(&old_tick) {
            inner.order.insert(tick, owner);
        }
        self.stats.record_hit();
        Some(value)
    }

    /// Insert with `ttl`, or the default TTL when `None`
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
        let mut inner = self.inner.lock();

        inner.remove(&key);
        let tick = inner.bump();
        inner.order.insert(tick, key.clone());
        inner.map.insert(
            key,
            Slot {
                value,
                expires_at,
                tick,
            },
        );

        let mut evicted = 0;
        while inner.map.len() > self.capacity {
            if inner.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            self.stats.record_evictions(evicted);
        }
    }

    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().remove(key).is_some()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.inner
            .lock()
            .map
            .get(key)
            .is_some_and(|slot| !slot.is_expired(now))
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<K> = inner
            .map
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Keys in least-recently-used order
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().order.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        self.stats.reset();
    }

    pub fn stats(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }
}
