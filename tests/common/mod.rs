// Shared fixtures for solution-cache integration tests
#![allow(dead_code)]

use solution_cache::config::{CacheConfig, StorageQuota};
use solution_cache::SolutionCacheManager;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A solution directory plus an isolated cache root
pub struct Workspace {
    pub solution: TempDir,
    pub cache: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            solution: TempDir::new().unwrap(),
            cache: TempDir::new().unwrap(),
        }
    }

    /// Configuration rooted at this workspace's cache directory. Free-space
    /// headroom is disabled so tests do not depend on the host volume.
    pub fn config(&self) -> CacheConfig {
        let mut config = CacheConfig::default().with_cache_root(self.cache.path());
        config.quota = StorageQuota {
            min_free_bytes: 0,
            ..StorageQuota::default()
        };
        config
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.solution.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn delete(&self, relative: &str) {
        fs::remove_file(self.solution.path().join(relative)).unwrap();
    }

    pub async fn open(&self) -> SolutionCacheManager {
        self.open_with(self.config()).await
    }

    pub async fn open_with(&self, config: CacheConfig) -> SolutionCacheManager {
        SolutionCacheManager::open(self.solution.path(), config)
            .await
            .unwrap()
    }
}

/// Names of the files in `changed` relative to their parent directory
pub fn file_names(changed: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = changed
        .iter()
        .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Temporary write files left behind under `root`
pub fn leftover_temp_files(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "tmp"))
        .collect()
}
