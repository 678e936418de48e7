//! Two-tier cache: a durable compressed tier on disk and a volatile
//! in-process tier, plus the storage quota that keeps the cache root bounded.

pub mod byte_store;
pub mod codec;
pub mod content_cache;
pub mod index_manager;
pub mod io_permits;
pub mod key;
pub mod maintenance;
pub mod stats;
pub mod storage_quota;
pub mod tiered;
pub mod volatile;

pub use byte_store::{ByteStore, StoredFile};
pub use content_cache::{CompressedContentCache, MaintenanceReport};
pub use index_manager::{CacheIndex, EntryMetadata, IndexManager};
pub use io_permits::IoPermits;
pub use key::{key_digest, CacheKey};
pub use maintenance::{MaintenanceHandle, PeriodicTask};
pub use stats::{CacheStatistics, HealthReport, StatisticsSnapshot, TieredStatistics};
pub use storage_quota::{CleanupReport, QuotaStats, StorageQuotaManager};
pub use tiered::{Cacheable, TieredCacheStore};
pub use volatile::VolatileCache;
