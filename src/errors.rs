//! Error types for cache operations.
//!
//! The cache distinguishes four kinds of failure:
//!
//! - **NotFound**: a key is absent or expired. This is a normal miss and is
//!   only surfaced by APIs that need a value to exist (e.g. `remove` reports
//!   it as `false`, never as an error).
//! - **Corrupted**: detected at read time, self-healed by deletion and turned
//!   into a miss. It appears as an error only in diagnostics and internal
//!   plumbing.
//! - **Io**: permission denied, disk full, path too long. Read paths recover
//!   these into a miss; `set` reports them so the caller knows nothing was
//!   written.
//! - **QuotaExceeded**: a write that would exceed the storage budget even after
//!   a cleanup attempt. Kept separate from `Io` so callers can choose to
//!   proceed without caching.
//!
//! # Example
//!
//! ```rust
//! use solution_cache::errors::CacheError;
//!
//! let err = CacheError::quota_exceeded(4096, 1024);
//! assert!(err.is_quota_exceeded());
//! assert!(err.is_recoverable());
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boxed error produced by a value factory.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent or expired
    #[error("cache key not found: {key}")]
    NotFound { key: String },

    /// A cache file failed validation
    #[error("corrupted cache file {}: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },

    /// File system failure
    #[error("I/O {operation} failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Write refused because the storage budget cannot accommodate it
    #[error("storage quota exceeded: {required} bytes required, {available} bytes available")]
    QuotaExceeded { required: u64, available: u64 },

    /// Value could not be serialized or deserialized
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The value factory returned an error
    #[error("value factory failed for key {key}: {source}")]
    Factory {
        key: String,
        #[source]
        source: FactoryError,
    },

    /// The operation observed a cancellation request
    #[error("operation cancelled")]
    Cancelled,
}

impl CacheError {
    /// Create a not-found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a corruption error with path context
    pub fn corrupted(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error with path and operation context
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: &'static str) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            operation,
            source,
        }
    }

    /// Create a quota error
    pub fn quota_exceeded(required: u64, available: u64) -> Self {
        Self::QuotaExceeded {
            required,
            available,
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap a factory failure
    pub fn factory(key: impl Into<String>, source: impl Into<FactoryError>) -> Self {
        Self::Factory {
            key: key.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the caller can carry on without the cache.
    ///
    /// Storage failures leave the computed value intact; factory errors,
    /// configuration errors and cancellation do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Corrupted { .. }
                | Self::Io { .. }
                | Self::QuotaExceeded { .. }
                | Self::Serialization { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_path_and_operation() {
        let err = CacheError::io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/tmp/cache/ab.cache",
            "write",
        );
        let msg = err.to_string();
        assert!(msg.contains("I/O write failed"));
        assert!(msg.contains("ab.cache"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_quota_exceeded_is_distinct_from_io() {
        let err = CacheError::quota_exceeded(2048, 100);
        assert!(err.is_quota_exceeded());
        assert!(!matches!(err, CacheError::Io { .. }));
        assert!(err.to_string().contains("2048 bytes required"));
    }

    #[test]
    fn test_factory_error_is_not_recoverable() {
        let err = CacheError::factory("graph:core", anyhow::anyhow!("analysis crashed"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("graph:core"));
        assert!(err.to_string().contains("analysis crashed"));
    }

    #[test]
    fn test_cancelled_classification() {
        let err = CacheError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: CacheError = json_err.into();
        assert!(matches!(err, CacheError::Serialization { .. }));
    }
}
