//! Configuration surface for the solution cache.
//!
//! Every section has documented defaults so an empty TOML file (or none at
//! all) produces a working configuration. Durations are stored as integer
//! seconds or days to keep the file format human-editable.

pub mod loader;
pub mod presets;

use crate::errors::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use loader::{load_config, parse_config, EnvironmentSnapshot};
pub use presets::RepositoryProfile;

const GIB: u64 = 1024 * 1024 * 1024;
const DAY_SECS: u64 = 86_400;

/// Top-level cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for durable entries, markers and snapshots
    pub cache_root: Option<PathBuf>,
    pub durable: DurableConfig,
    pub volatile: VolatileConfig,
    pub quota: StorageQuota,
    pub snapshot: SnapshotConfig,
    /// Concurrent file operations allowed (defaults to 2x available cores)
    pub io_permits: Option<usize>,
    /// Serialize concurrent factory calls for the same key within a process
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            durable: DurableConfig::default(),
            volatile: VolatileConfig::default(),
            quota: StorageQuota::default(),
            snapshot: SnapshotConfig::default(),
            io_permits: None,
            single_flight: true,
        }
    }
}

impl CacheConfig {
    /// Resolve the cache root, falling back to the platform cache directory.
    pub fn resolve_cache_root(&self) -> PathBuf {
        if let Some(root) = &self.cache_root {
            return root.clone();
        }

        dirs::cache_dir()
            .map(|dir| dir.join("solution-cache"))
            .unwrap_or_else(|| std::env::temp_dir().join("solution-cache"))
    }

    /// Number of permits for concurrent file operations.
    pub fn effective_io_permits(&self) -> usize {
        self.io_permits
            .filter(|permits| *permits > 0)
            .unwrap_or_else(|| available_cores() * 2)
    }

    /// Builder-style helper used heavily by tests.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.durable.max_bytes == 0 {
            return Err(CacheError::configuration("durable.max_bytes must be > 0"));
        }
        if self.quota.max_bytes == 0 {
            return Err(CacheError::configuration("quota.max_bytes must be > 0"));
        }
        if self.volatile.capacity == 0 {
            return Err(CacheError::configuration("volatile.capacity must be > 0"));
        }
        if self.quota.sweep_interval_secs == 0 {
            return Err(CacheError::configuration(
                "quota.sweep_interval_secs must be > 0",
            ));
        }
        self.snapshot.validate()
    }
}

/// Settings for the disk-backed compressed tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    /// Byte budget for compressed entries
    pub max_bytes: u64,
    /// TTL applied to durable writes; `None` keeps entries until evicted
    pub default_ttl_secs: Option<u64>,
    /// Interval of the background maintenance pass
    pub maintenance_interval_secs: u64,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            max_bytes: GIB,
            default_ttl_secs: Some(7 * DAY_SECS),
            maintenance_interval_secs: 600,
        }
    }
}

impl DurableConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

/// Settings for the in-process tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatileConfig {
    /// Maximum number of entries held in memory
    pub capacity: usize,
    /// TTL for in-memory entries; shorter than the durable TTL
    pub ttl_secs: u64,
}

impl Default for VolatileConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 30 * 60,
        }
    }
}

impl VolatileConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Disk-space and retention policy for a cache root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageQuota {
    /// Upper bound on bytes stored under the cache root
    pub max_bytes: u64,
    /// Free space that must remain on the volume after a write
    pub min_free_bytes: u64,
    /// Files created longer ago than this are deleted
    pub max_age_days: u64,
    /// Files not accessed within this many days are deleted
    pub unused_after_days: u64,
    /// Interval between background sweeps
    pub sweep_interval_secs: u64,
}

impl Default for StorageQuota {
    fn default() -> Self {
        Self {
            max_bytes: GIB,
            min_free_bytes: 5 * GIB,
            max_age_days: 30,
            unused_after_days: 7,
            sweep_interval_secs: 3600,
        }
    }
}

impl StorageQuota {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * DAY_SECS)
    }

    pub fn unused_after(&self) -> Duration {
        Duration::from_secs(self.unused_after_days * DAY_SECS)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// File-set and heuristic settings for snapshot diffing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Ordered include globs, relative to the solution root
    pub include: Vec<String>,
    /// Prefix/substring patterns on the root-relative path
    pub exclude: Vec<String>,
    /// Extensions of project-definition files
    pub project_extensions: Vec<String>,
    /// Extensions treated as source files by the heuristic pass
    pub source_extensions: Vec<String>,
    /// Key fragments identifying compilation/analysis-derived entries
    pub reserved_tokens: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            include: strings(&[
                "**/*.sln",
                "**/*.csproj",
                "**/*.vbproj",
                "**/*.fsproj",
                "**/*.props",
                "**/*.targets",
                "**/*.cs",
                "**/*.vb",
                "**/*.fs",
            ]),
            exclude: strings(&["bin/", "obj/", ".git/", ".vs/", "node_modules/", "packages/"]),
            project_extensions: strings(&["csproj", "vbproj", "fsproj"]),
            source_extensions: strings(&["cs", "vb", "fs"]),
            reserved_tokens: strings(&["compilation", "semantic", "symbols", "callgraph"]),
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(CacheError::configuration(
                "snapshot.include must contain at least one pattern",
            ));
        }
        for pattern in &self.include {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(CacheError::configuration(format!(
                    "invalid include pattern '{}': {}",
                    pattern, e
                )));
            }
        }
        Ok(())
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.durable.max_bytes, GIB);
        assert_eq!(config.quota.min_free_bytes, 5 * GIB);
        assert_eq!(config.quota.max_age(), Duration::from_secs(30 * DAY_SECS));
        assert_eq!(config.quota.unused_after_days, 7);
        assert_eq!(config.quota.sweep_interval(), Duration::from_secs(3600));
        assert!(config.single_flight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_io_permits() {
        let config = CacheConfig::default();
        assert!(config.effective_io_permits() >= 2);

        let explicit = CacheConfig {
            io_permits: Some(3),
            ..Default::default()
        };
        assert_eq!(explicit.effective_io_permits(), 3);

        let zero = CacheConfig {
            io_permits: Some(0),
            ..Default::default()
        };
        assert!(zero.effective_io_permits() >= 2);
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let mut config = CacheConfig::default();
        config.snapshot.include = vec!["src/[".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid include pattern"));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = CacheConfig::default();
        config.durable.max_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_cache_root_wins() {
        let config = CacheConfig::default().with_cache_root("/tmp/explicit-root");
        assert_eq!(config.resolve_cache_root(), PathBuf::from("/tmp/explicit-root"));
    }
}
