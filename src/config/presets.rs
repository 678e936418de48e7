//! Configuration presets scaled to repository size.
//!
//! Larger solutions produce more artifacts per invocation, so the durable
//! budget and the in-memory capacity grow with the project count while the
//! retention windows shrink to keep the cache root from filling the disk.
//!
//! # Example
//!
//! ```rust
//! use solution_cache::config::RepositoryProfile;
//!
//! let profile = RepositoryProfile::for_project_count(140);
//! assert_eq!(profile, RepositoryProfile::Large);
//! let config = profile.to_config();
//! assert!(config.quota.max_age_days < 30);
//! ```

use serde::{Deserialize, Serialize};

use super::CacheConfig;

const GIB: u64 = 1024 * 1024 * 1024;

/// Repository size classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryProfile {
    /// Fewer than 25 projects
    Small,
    /// 25 to 99 projects
    Medium,
    /// 100 to 299 projects
    Large,
    /// 300 projects or more
    VeryLarge,
}

impl RepositoryProfile {
    pub fn for_project_count(projects: usize) -> Self {
        match projects {
            0..=24 => Self::Small,
            25..=99 => Self::Medium,
            100..=299 => Self::Large,
            _ => Self::VeryLarge,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            "very_large" | "very-large" | "verylarge" => Some(Self::VeryLarge),
            _ => None,
        }
    }

    /// Full configuration for this profile.
    pub fn to_config(self) -> CacheConfig {
        self.apply(CacheConfig::default())
    }

    /// Overlay the profile's budgets on an existing configuration.
    pub fn apply(self, mut config: CacheConfig) -> CacheConfig {
        let (budget_gib, max_age_days, unused_days, capacity, volatile_mins) = match self {
            Self::Small => (1, 30, 7, 1024, 30),
            Self::Medium => (2, 21, 5, 2048, 20),
            Self::Large => (4, 14, 3, 4096, 15),
            Self::VeryLarge => (8, 7, 2, 8192, 10),
        };

        config.durable.max_bytes = budget_gib * GIB;
        config.quota.max_bytes = budget_gib * GIB;
        config.quota.max_age_days = max_age_days;
        config.quota.unused_after_days = unused_days;
        config.volatile.capacity = capacity;
        config.volatile.ttl_secs = volatile_mins * 60;
        config
    }
}
