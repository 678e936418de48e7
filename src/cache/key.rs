//! Cache key construction and key-to-file mapping.
//!
//! Keys are caller-defined strings of the form `namespace:identity`. On disk a
//! key is never used verbatim: its SHA-256 digest names the file, so crafted
//! keys cannot escape the cache root.

use sha2::{Digest, Sha256};
use std::fmt;

/// Extension of durable entry files
pub const ENTRY_EXTENSION: &str = "cache";

/// A namespaced cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    identity: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identity: identity.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identity)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

/// Hex SHA-256 digest of a logical key
pub fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File name for a logical key: `<digest>.cache`
pub fn entry_file_name(key: &str) -> String {
    format!("{}.{}", key_digest(key), ENTRY_EXTENSION)
}

/// Recover the digest from an entry file name, if it is one
pub fn digest_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(ENTRY_EXTENSION)?.strip_suffix('.')?;
    let is_digest = stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit());
    is_digest.then_some(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = CacheKey::new("callgraph", "Core.csproj");
        assert_eq!(key.to_string(), "callgraph:Core.csproj");
        assert_eq!(key.namespace(), "callgraph");
    }

    #[test]
    fn test_digest_is_deterministic_and_bounded() {
        let a = key_digest("project:../../etc/passwd");
        let b = key_digest("project:../../etc/passwd");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, key_digest("project:other"));
    }

    #[test]
    fn test_entry_file_name_round_trips_digest() {
        let name = entry_file_name("symbols:Api");
        assert!(name.ends_with(".cache"));
        assert_eq!(digest_from_file_name(&name), Some(key_digest("symbols:Api").as_str()));
    }

    #[test]
    fn test_digest_from_foreign_names() {
        assert_eq!(digest_from_file_name(".last-cleanup"), None);
        assert_eq!(digest_from_file_name("short.cache"), None);
        assert_eq!(digest_from_file_name("abc.cache.tmp"), None);
    }
}
