//! Point-in-time content hashes of a solution and the diff between two of
//! them.

pub mod dependencies;
pub mod file_set;
pub mod invalidator;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub use dependencies::DependencyRegistry;
pub use file_set::FileSetSpec;
pub use invalidator::{Detection, InvalidationReport, SnapshotDiffInvalidator};
pub use store::SnapshotStore;

/// Content digest per tracked file
pub type FileHashes = BTreeMap<PathBuf, String>;

/// Dependency files per cache key
pub type FileDependencies = BTreeMap<String, BTreeSet<PathBuf>>;

/// Hashes of every tracked file plus the key-to-file dependency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub root_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub file_hashes: FileHashes,
    #[serde(default)]
    pub file_dependencies: FileDependencies,
}

impl Snapshot {
    pub fn new(root_path: impl Into<PathBuf>, file_hashes: FileHashes, file_dependencies: FileDependencies) -> Self {
        Self {
            root_path: root_path.into(),
            created_at: Utc::now(),
            file_hashes,
            file_dependencies,
        }
    }

    pub fn file_count(&self) -> usize {
        self.file_hashes.len()
    }

    /// Changes needed to go from this snapshot to `current`
    pub fn diff(&self, current: &FileHashes) -> ChangeSet {
        ChangeSet::between(&self.file_hashes, current)
    }
}

/// Files added, modified or deleted between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl ChangeSet {
    /// A path is modified when both sides hash it differently, added when
    /// only `current` has it and deleted when only `prior` has it.
    pub fn between(prior: &FileHashes, current: &FileHashes) -> Self {
        let mut changes = ChangeSet::default();

        for (path, hash) in current {
            match prior.get(path) {
                None => changes.added.push(path.clone()),
                Some(old) if old != hash => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }

        changes.deleted = prior
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        changes
    }

    /// Everything is new when there is no prior history
    pub fn all_added(current: &FileHashes) -> Self {
        Self {
            added: current.keys().cloned().collect(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    pub fn changed_files(&self) -> impl Iterator<Item = &Path> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .map(PathBuf::as_path)
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} deleted",
            self.added.len(),
            self.modified.len(),
            self.deleted.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hashes(entries: &[(&str, &str)]) -> FileHashes {
        entries
            .iter()
            .map(|(path, hash)| (PathBuf::from(path), hash.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_classifies_each_change() {
        let prior = Snapshot::new(
            "/sln",
            hashes(&[("/sln/A.cs", "1"), ("/sln/B.cs", "2"), ("/sln/C.cs", "3")]),
            FileDependencies::new(),
        );
        let current = hashes(&[("/sln/A.cs", "1"), ("/sln/B.cs", "22"), ("/sln/D.cs", "4")]);

        let changes = prior.diff(&current);
        assert_eq!(
            changes,
            ChangeSet {
                added: vec![PathBuf::from("/sln/D.cs")],
                modified: vec![PathBuf::from("/sln/B.cs")],
                deleted: vec![PathBuf::from("/sln/C.cs")],
            }
        );
        assert_eq!(changes.len(), 3);
        assert_eq!(changes.to_string(), "1 added, 1 modified, 1 deleted");
    }

    #[test]
    fn test_identical_hashes_have_no_changes() {
        let files = hashes(&[("/sln/A.cs", "1")]);
        assert!(ChangeSet::between(&files, &files).is_empty());
    }

    #[test]
    fn test_all_added_without_history() {
        let files = hashes(&[("/sln/A.cs", "1"), ("/sln/B.cs", "2")]);
        let changes = ChangeSet::all_added(&files);
        assert_eq!(changes.added.len(), 2);
        assert_eq!(changes.changed_files().count(), 2);
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let mut deps = FileDependencies::new();
        deps.insert(
            "compilation:Core".into(),
            [PathBuf::from("/sln/A.cs")].into_iter().collect(),
        );
        let snapshot = Snapshot::new("/sln", hashes(&[("/sln/A.cs", "1")]), deps);

        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
