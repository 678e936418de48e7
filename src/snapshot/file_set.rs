//! Which files a snapshot covers, and their content hashes.
//!
//! Include patterns are globs applied to the path relative to the solution
//! root, in order; a file matched by several patterns is listed once.
//! Exclude entries are plain strings matched as a prefix of, or substring
//! within, the relative path (with `/` separators), so `bin/` prunes every
//! build output directory at any depth.

use crate::cache::io_permits::IoPermits;
use crate::config::SnapshotConfig;
use crate::errors::{CacheError, Result};
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::FileHashes;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled include/exclude rules
#[derive(Debug, Clone)]
pub struct FileSetSpec {
    include: Vec<Pattern>,
    exclude: Vec<String>,
}

/// Relative path with forward slashes
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(relative.to_string_lossy().replace('\\', "/"))
}

impl FileSetSpec {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = include
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    CacheError::configuration(format!("invalid include pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            include,
            exclude: exclude.iter().map(|e| e.replace('\\', "/")).collect(),
        })
    }

    pub fn from_config(config: &SnapshotConfig) -> Result<Self> {
        Self::new(&config.include, &config.exclude)
    }

    pub fn is_excluded(&self, relative: &str) -> bool {
        self.exclude
            .iter()
            .any(|ex| relative.starts_with(ex.as_str()) || relative.contains(ex.as_str()))
    }

    pub fn is_included(&self, relative: &str) -> bool {
        self.include
            .iter()
            .any(|pattern| pattern.matches_with(relative, MATCH_OPTIONS))
    }

    /// Walk `root` and return the matching files, sorted and de-duplicated.
    /// Blocking; run it on the blocking pool.
    pub fn collect(&self, root: &Path, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        let mut files = BTreeSet::new();

        let walker = WalkDir::new(root).follow_links(false).into_iter();
        let walker = walker.filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            // Directories are tested with a trailing slash so `obj/` matches
            relative_key(root, entry.path())
                .map(|rel| !self.is_excluded(&format!("{}/", rel)))
                .unwrap_or(true)
        });

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative) = relative_key(root, entry.path()) else {
                continue;
            };
            if self.is_included(&relative) && !self.is_excluded(&relative) {
                files.insert(entry.into_path());
            }
        }

        Ok(files.into_iter().collect())
    }

    /// [`collect`](Self::collect) on the blocking pool
    pub async fn resolve(&self, root: &Path, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        let spec = self.clone();
        let root_buf = root.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || spec.collect(&root_buf, &cancel))
            .await
            .map_err(|e| CacheError::io(std::io::Error::other(e), root, "walk"))?
    }
}

/// SHA-256 hex digest of a byte slice
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash every file, bounded by `permits`. Files that vanish or cannot be
/// read are left out and so look deleted to the next diff.
pub async fn hash_files(
    files: Vec<PathBuf>,
    permits: &IoPermits,
    cancel: &CancellationToken,
) -> Result<FileHashes> {
    let mut tasks = JoinSet::new();

    for path in files {
        if cancel.is_cancelled() {
            tasks.abort_all();
            return Err(CacheError::Cancelled);
        }
        let permit = permits.acquire_owned().await;
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if cancel.is_cancelled() {
                return None;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => Some((path, content_hash(&bytes))),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    log::warn!("Cannot hash {}: {}", path.display(), e);
                    None
                }
            }
        });
    }

    let mut hashes = FileHashes::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((path, hash))) => {
                hashes.insert(path, hash);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Hashing task failed: {}", e),
        }
    }

    if cancel.is_cancelled() {
        return Err(CacheError::Cancelled);
    }
    Ok(hashes)
}
