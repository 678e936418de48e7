//! Maps file-system changes between snapshots onto cache keys.
//!
//! Invalidation runs two passes over the changed files:
//!
//! - exact: every key whose registered dependency set contains a changed
//!   file
//! - heuristic: a changed project file invalidates keys with a dependency
//!   path containing the project's base name, and a changed source file
//!   invalidates every key whose name contains a reserved token
//!
//! The heuristic pass covers keys whose real dependencies were never
//! registered. It over-invalidates on purpose: a spurious recompute is
//! acceptable, a stale hit is not.

use super::dependencies::DependencyRegistry;
use super::file_set::{hash_files, FileSetSpec};
use super::store::SnapshotStore;
use super::{ChangeSet, FileHashes, Snapshot};
use crate::cache::io_permits::IoPermits;
use crate::cache::tiered::TieredCacheStore;
use crate::config::SnapshotConfig;
use crate::errors::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Changes found by one scan and the hashes they were computed from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub changes: ChangeSet,
    pub hashes: FileHashes,
}

/// Keys removed by one invalidation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub exact: Vec<String>,
    pub heuristic: Vec<String>,
}

impl InvalidationReport {
    pub fn total(&self) -> usize {
        self.exact.len() + self.heuristic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn contains_token(key: &str, tokens: &[String]) -> bool {
    let key = key.to_lowercase();
    tokens.iter().any(|token| key.contains(&token.to_lowercase()))
}

/// Select keys for the heuristic pass, skipping those already in `exact`
fn heuristic_candidates(
    changes: &ChangeSet,
    config: &SnapshotConfig,
    registry: &DependencyRegistry,
    known_keys: &[String],
    exact: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut selected = BTreeSet::new();

    let project_names: BTreeSet<String> = changes
        .changed_files()
        .filter(|path| has_extension(path, &config.project_extensions))
        .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
        .collect();
    for name in &project_names {
        selected.extend(registry.keys_with_path_containing(name));
    }

    let source_changed = changes
        .changed_files()
        .any(|path| has_extension(path, &config.source_extensions));
    if source_changed {
        selected.extend(
            known_keys
                .iter()
                .chain(registry.keys().iter())
                .filter(|key| contains_token(key, &config.reserved_tokens))
                .cloned(),
        );
    }

    selected.retain(|key| !exact.contains(key));
    selected
}

/// Snapshot-diff invalidation for one solution root
#[derive(Debug)]
pub struct SnapshotDiffInvalidator {
    root: PathBuf,
    config: SnapshotConfig,
    file_set: FileSetSpec,
    store: SnapshotStore,
    permits: IoPermits,
    dependencies: Arc<DependencyRegistry>,
    prior: RwLock<Option<Snapshot>>,
}

impl SnapshotDiffInvalidator {
    pub fn new(
        root: impl Into<PathBuf>,
        config: SnapshotConfig,
        store: SnapshotStore,
        permits: IoPermits,
        dependencies: Arc<DependencyRegistry>,
    ) -> Result<Self> {
        let file_set = FileSetSpec::from_config(&config)?;
        Ok(Self {
            root: root.into(),
            config,
            file_set,
            store,
            permits,
            dependencies,
            prior: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the prior snapshot and restore the dependency table from it.
    /// Returns whether history was found.
    pub async fn initialize(&self) -> bool {
        let loaded = self.store.load(&self.root).await;
        let found = loaded.is_some();
        if let Some(snapshot) = &loaded {
            self.dependencies
                .load_table(snapshot.file_dependencies.clone());
            log::info!(
                "Loaded snapshot of {} ({} files, {} dependency sets, taken {})",
                self.root.display(),
                snapshot.file_count(),
                snapshot.file_dependencies.len(),
                snapshot.created_at
            );
        } else {
            log::info!("No prior snapshot for {}", self.root.display());
        }
        *self.prior.write() = loaded;
        found
    }

    pub fn prior(&self) -> Option<Snapshot> {
        self.prior.read().clone()
    }

    pub fn tracked_files(&self) -> usize {
        self.prior.read().as_ref().map_or(0, Snapshot::file_count)
    }

    /// Hash the current file set
    pub async fn capture(&self, cancel: &CancellationToken) -> Result<FileHashes> {
        let files = self.file_set.resolve(&self.root, cancel).await?;
        hash_files(files, &self.permits, cancel).await
    }

    /// Diff the current file set against the prior snapshot; without one,
    /// every file counts as added. Pass the returned hashes to
    /// [`commit`](Self::commit) so the next baseline is exactly what was
    /// diffed.
    pub async fn detect_changes(&self, cancel: &CancellationToken) -> Result<Detection> {
        let hashes = self.capture(cancel).await?;
        let changes = match self.prior.read().as_ref() {
            Some(prior) => prior.diff(&hashes),
            None => ChangeSet::all_added(&hashes),
        };
        log::info!("Changes in {}: {}", self.root.display(), changes);
        Ok(Detection { changes, hashes })
    }

    /// Remove every key affected by `changes` from both tiers and drop its
    /// dependency registration
    pub async fn invalidate(&self, changes: &ChangeSet, cache: &TieredCacheStore) -> InvalidationReport {
        if changes.is_empty() {
            return InvalidationReport::default();
        }

        let changed: BTreeSet<&Path> = changes.changed_files().collect();
        let exact: BTreeSet<String> = self.dependencies.keys_depending_on(&changed).into_iter().collect();
        let heuristic = heuristic_candidates(
            changes,
            &self.config,
            &self.dependencies,
            &cache.known_keys(),
            &exact,
        );

        for key in exact.iter().chain(heuristic.iter()) {
            cache.remove(key).await;
            self.dependencies.remove(key);
            log::debug!("Invalidated {}", key);
        }

        let report = InvalidationReport {
            exact: exact.into_iter().collect(),
            heuristic: heuristic.into_iter().collect(),
        };
        if !report.is_empty() {
            log::info!(
                "Invalidated {} keys ({} by dependency, {} by heuristic)",
                report.total(),
                report.exact.len(),
                report.heuristic.len()
            );
        }
        report
    }

    /// Capture and persist a fresh snapshot, which becomes the new baseline
    pub async fn save_snapshot(&self, cancel: &CancellationToken) -> Result<Snapshot> {
        let hashes = self.capture(cancel).await?;
        self.commit(hashes).await
    }

    /// Persist `hashes` with the current dependency table as the new
    /// baseline. Edits made after `hashes` were captured show up in the next
    /// diff.
    pub async fn commit(&self, hashes: FileHashes) -> Result<Snapshot> {
        let snapshot = Snapshot::new(&self.root, hashes, self.dependencies.to_table());
        self.store.save(&snapshot).await?;
        *self.prior.write() = Some(snapshot.clone());
        Ok(snapshot)
    }
}
