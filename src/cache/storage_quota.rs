//! Disk-space and retention policy for a cache root.
//!
//! The quota manager does not care which component wrote a file: it sweeps
//! every regular file under the root, skipping dot-prefixed files and
//! directories (the index, markers and snapshots) and in-flight temporary
//! files. A sweep applies, in order:
//!
//! 1. delete files older than `max_age` (creation time)
//! 2. delete files not accessed within `unused_after_days`
//! 3. if still over `max_bytes`, delete least recently accessed files until
//!    the total is at or below 70% of the budget
//! 4. remove empty directories, deepest first
//! 5. write the `.last-cleanup` marker
//!
//! One quota covers the whole cache root, including the entry directories of
//! every solution sharing it.
//!
//! Files that disappear mid-sweep are skipped silently; the owning cache
//! re-validates every entry on its next access.

use crate::cache::byte_store::TEMP_SUFFIX;
use crate::cache::io_permits::IoPermits;
use crate::config::StorageQuota;
use crate::errors::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

/// Marker file holding the RFC 3339 timestamp of the last sweep
pub const LAST_CLEANUP_MARKER: &str = ".last-cleanup";

/// Size-driven cleanup stops at this fraction of `max_bytes`
pub const CLEANUP_TARGET_RATIO: f64 = 0.7;

/// Usage at or above this fraction of `max_bytes` counts as near the limit
pub const NEAR_LIMIT_RATIO: f64 = 0.9;

/// A file found during a sweep
#[derive(Debug, Clone)]
struct SweptFile {
    path: PathBuf,
    size_bytes: u64,
    created: SystemTime,
    accessed: SystemTime,
}

/// Read-only view of the cache root against its quota
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaStats {
    pub total_bytes: u64,
    pub file_count: usize,
    pub max_bytes: u64,
    pub expired_count: usize,
    pub unused_count: usize,
    pub near_limit: bool,
    pub needs_cleanup: bool,
}

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub deleted_bytes: u64,
    pub failed_count: usize,
    pub removed_directories: usize,
}

impl std::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Deleted {} files ({:.2} MB), {} failures, {} empty directories removed",
            self.deleted_count,
            self.deleted_bytes as f64 / 1_048_576.0,
            self.failed_count,
            self.removed_directories
        )
    }
}

/// Outcome of deleting one file
enum Deletion {
    Deleted,
    Vanished,
    Failed,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn is_temp(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
}

fn scan_files(root: &Path) -> Vec<SweptFile> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && !is_temp(entry))
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let created = meta.created().unwrap_or(modified);
            let accessed = meta.accessed().unwrap_or(modified).max(modified);
            Some(SweptFile {
                path: entry.into_path(),
                size_bytes: meta.len(),
                created,
                accessed,
            })
        })
        .collect()
}

/// Directories below the root, deepest first
fn scan_directories(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<(usize, PathBuf)> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| (entry.depth(), entry.into_path()))
        .collect();
    dirs.sort_by(|a, b| b.0.cmp(&a.0));
    dirs.into_iter().map(|(_, path)| path).collect()
}

fn is_older_than(time: SystemTime, now: SystemTime, age: std::time::Duration) -> bool {
    now.duration_since(time).is_ok_and(|elapsed| elapsed > age)
}

/// Files to delete for the size phase, least recently accessed first
fn select_lru_victims(files: &[&SweptFile], current_total: u64, target: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..files.len()).collect();
    order.sort_by_key(|&i| files[i].accessed);

    let mut remaining = current_total;
    let mut victims = Vec::new();
    for i in order {
        if remaining <= target {
            break;
        }
        remaining = remaining.saturating_sub(files[i].size_bytes);
        victims.push(i);
    }
    victims
}

/// Tally a deletion; returns whether the file is gone
fn tally(report: &mut CleanupReport, outcome: Deletion, size: u64) -> bool {
    match outcome {
        Deletion::Deleted => {
            report.deleted_count += 1;
            report.deleted_bytes += size;
            true
        }
        Deletion::Vanished => true,
        Deletion::Failed => {
            report.failed_count += 1;
            false
        }
    }
}

/// Enforces a [`StorageQuota`] over one cache root
#[derive(Debug)]
pub struct StorageQuotaManager {
    root: PathBuf,
    quota: StorageQuota,
    permits: IoPermits,
    sweep_lock: tokio::sync::Mutex<()>,
}

impl StorageQuotaManager {
    pub fn new(root: impl Into<PathBuf>, quota: StorageQuota, permits: IoPermits) -> Self {
        Self {
            root: root.into(),
            quota,
            permits,
            sweep_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn quota(&self) -> &StorageQuota {
        &self.quota
    }

    async fn scan(&self) -> Result<Vec<SweptFile>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_files(&root))
            .await
            .map_err(|e| CacheError::io(std::io::Error::other(e), &self.root, "scan"))
    }

    /// Bytes currently used under the root
    pub async fn total_bytes(&self) -> Result<u64> {
        Ok(self.scan().await?.iter().map(|f| f.size_bytes).sum())
    }

    /// Free space on the volume holding the root; `None` when unknown
    async fn available_space(&self) -> Option<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let probe = root.ancestors().find(|p| p.exists())?;
            fs4::available_space(probe).ok()
        })
        .await
        .ok()
        .flatten()
    }

    /// Bytes that could still be written without violating either limit
    async fn headroom(&self, total: u64) -> u64 {
        let budget = self.quota.max_bytes.saturating_sub(total);
        match self.available_space().await {
            Some(free) => budget.min(free.saturating_sub(self.quota.min_free_bytes)),
            None => budget,
        }
    }

    /// Whether `required` more bytes fit under the budget while leaving
    /// `min_free_bytes` free on the volume
    pub async fn has_sufficient_space(&self, required: u64) -> bool {
        match self.total_bytes().await {
            Ok(total) => required <= self.headroom(total).await,
            Err(e) => {
                log::warn!("Quota check failed for {}: {}", self.root.display(), e);
                false
            }
        }
    }

    pub async fn stats(&self) -> Result<QuotaStats> {
        let files = self.scan().await?;
        let now = SystemTime::now();
        let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
        let expired_count = files
            .iter()
            .filter(|f| is_older_than(f.created, now, self.quota.max_age()))
            .count();
        let unused_count = files
            .iter()
            .filter(|f| is_older_than(f.accessed, now, self.quota.unused_after()))
            .count();
        let near_limit = total_bytes as f64 >= self.quota.max_bytes as f64 * NEAR_LIMIT_RATIO;

        Ok(QuotaStats {
            total_bytes,
            file_count: files.len(),
            max_bytes: self.quota.max_bytes,
            expired_count,
            unused_count,
            near_limit,
            needs_cleanup: total_bytes > self.quota.max_bytes || expired_count > 0 || unused_count > 0,
        })
    }

    async fn delete(&self, file: &SweptFile) -> Deletion {
        let _permit = self.permits.acquire().await;
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => Deletion::Deleted,
            Err(e) if e.kind() == ErrorKind::NotFound => Deletion::Vanished,
            Err(e) => {
                log::warn!("Failed to delete {}: {}", file.path.display(), e);
                Deletion::Failed
            }
        }
    }

    /// Run one sweep. Cancellation is checked between files; a cancelled
    /// sweep leaves every untouched file in place.
    pub async fn cleanup(&self, cancel: &CancellationToken) -> Result<CleanupReport> {
        let _guard = self.sweep_lock.lock().await;
        let files = self.scan().await?;
        let now = SystemTime::now();
        let mut report = CleanupReport::default();
        let mut gone: HashSet<usize> = HashSet::new();

        // Age then idleness
        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let stale = is_older_than(file.created, now, self.quota.max_age())
                || is_older_than(file.accessed, now, self.quota.unused_after());
            if stale {
                let outcome = self.delete(file).await;
                if tally(&mut report, outcome, file.size_bytes) {
                    gone.insert(index);
                }
            }
        }

        // Size
        let survivors: Vec<&SweptFile> = files
            .iter()
            .enumerate()
            .filter(|(i, _)| !gone.contains(i))
            .map(|(_, f)| f)
            .collect();
        let remaining: u64 = survivors.iter().map(|f| f.size_bytes).sum();
        if remaining > self.quota.max_bytes {
            let target = (self.quota.max_bytes as f64 * CLEANUP_TARGET_RATIO) as u64;
            for victim in select_lru_victims(&survivors, remaining, target) {
                if cancel.is_cancelled() {
                    return Err(CacheError::Cancelled);
                }
                let file = survivors[victim];
                let outcome = self.delete(file).await;
                tally(&mut report, outcome, file.size_bytes);
            }
        }

        report.removed_directories = self.remove_empty_directories(cancel).await?;
        self.write_marker().await;

        log::info!("Storage cleanup of {}: {}", self.root.display(), report);
        Ok(report)
    }

    async fn remove_empty_directories(&self, cancel: &CancellationToken) -> Result<usize> {
        let root = self.root.clone();
        let dirs = tokio::task::spawn_blocking(move || scan_directories(&root))
            .await
            .map_err(|e| CacheError::io(std::io::Error::other(e), &self.root, "scan"))?;

        let mut removed = 0;
        for dir in dirs {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            // Fails on non-empty directories, which is the filter we want.
            if tokio::fs::remove_dir(&dir).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn write_marker(&self) {
        let path = self.root.join(LAST_CLEANUP_MARKER);
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            log::warn!("Cannot create {}: {}", self.root.display(), e);
            return;
        }
        if let Err(e) = tokio::fs::write(&path, Utc::now().to_rfc3339()).await {
            log::warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    /// Timestamp recorded by the most recent sweep
    pub async fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        let content = tokio::fs::read_to_string(self.root.join(LAST_CLEANUP_MARKER))
            .await
            .ok()?;
        DateTime::parse_from_rfc3339(content.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Make room for `required` bytes, sweeping at most once. Returns
    /// whether a sweep ran, in which case files other components track may
    /// be gone.
    pub async fn ensure_space(&self, required: u64) -> Result<bool> {
        let total = self.total_bytes().await?;
        if required <= self.headroom(total).await {
            return Ok(false);
        }

        log::info!(
            "Insufficient space for {} bytes under {}, running cleanup",
            required,
            self.root.display()
        );
        if let Err(e) = self.cleanup(&CancellationToken::new()).await {
            log::warn!("Cleanup before write failed: {}", e);
        }

        let total = self.total_bytes().await?;
        let available = self.headroom(total).await;
        if required <= available {
            Ok(true)
        } else {
            log::warn!(
                "Refusing write of {} bytes: only {} bytes available",
                required,
                available
            );
            Err(CacheError::quota_exceeded(required, available))
        }
    }
}
