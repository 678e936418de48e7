//! Solution-scoped, content-addressed cache for expensive code-analysis
//! artifacts.
//!
//! Values are cached in two tiers: gzip-compressed JSON files under a cache
//! root that survive restarts, and a bounded in-process map used as a fast
//! path and promotion source. Entries are invalidated when the source files
//! they were derived from change between snapshots, and a storage quota keeps
//! the cache root bounded in size and age.

// Export modules for library usage
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod snapshot;
pub mod solution;

// Re-export commonly used types
pub use crate::cache::{
    CacheKey, CleanupReport, CompressedContentCache, HealthReport, StatisticsSnapshot,
    StorageQuotaManager, TieredCacheStore, VolatileCache,
};
pub use crate::config::{CacheConfig, RepositoryProfile, StorageQuota};
pub use crate::errors::{CacheError, Result};
pub use crate::snapshot::{ChangeSet, Snapshot, SnapshotDiffInvalidator};
pub use crate::solution::{RefreshReport, SolutionCacheManager};
