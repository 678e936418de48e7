//! Cache key to source file dependency table.
//!
//! One set per key; registering again replaces the set. The table is not
//! persisted on its own: it travels inside each saved snapshot and is
//! restored from the prior snapshot on startup.

use super::FileDependencies;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Make paths absolute against `base` and keep only existing files.
///
/// Paths are canonicalized so they compare equal to the paths a snapshot
/// records for the same files.
pub fn normalize_dependencies<I, P>(paths: I, base: &Path) -> BTreeSet<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .filter_map(|path| {
            let path = path.as_ref();
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            };
            let canonical = absolute.canonicalize().ok()?;
            canonical.is_file().then_some(canonical)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct DependencyRegistry {
    entries: RwLock<HashMap<String, BTreeSet<PathBuf>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependency set of `key`. An empty set drops the
    /// registration.
    pub fn register(&self, key: &str, files: BTreeSet<PathBuf>) {
        let mut entries = self.entries.write();
        if files.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), files);
        }
    }

    pub fn get(&self, key: &str) -> Option<BTreeSet<PathBuf>> {
        self.entries.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Keys whose dependency set intersects `changed`
    pub fn keys_depending_on(&self, changed: &BTreeSet<&Path>) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, files)| files.iter().any(|f| changed.contains(f.as_path())))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Keys with any dependency path containing `fragment`, ignoring case
    pub fn keys_with_path_containing(&self, fragment: &str) -> Vec<String> {
        let needle = fragment.to_lowercase();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, files)| {
                files
                    .iter()
                    .any(|f| f.to_string_lossy().to_lowercase().contains(&needle))
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Copy for persisting into a snapshot
    pub fn to_table(&self) -> FileDependencies {
        self.entries
            .read()
            .iter()
            .map(|(key, files)| (key.clone(), files.clone()))
            .collect()
    }

    /// Replace everything with a table restored from a snapshot
    pub fn load_table(&self, table: FileDependencies) {
        *self.entries.write() = table.into_iter().filter(|(_, f)| !f.is_empty()).collect();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct files referenced by any key
    pub fn file_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .flatten()
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
