//! Cache error types

use std::sync::Arc;
use std::time::Duration;

/// Error type returned by loaders and backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Cache-related errors
///
/// Cloneable so that the outcome of a single load can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Load error for key {key}: {source}")]
    Load {
        key: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("Backend error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),

    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("Load for key {key} was cancelled or panicked")]
    Cancelled { key: String },

    #[error("Timed out after {waited:?} waiting for in-flight load of key {key}")]
    Timeout { key: String, waited: Duration },

    #[error("Key field '{field}' missing for namespace '{namespace}'")]
    MissingKeyField {
        namespace: &'static str,
        field: &'static str,
    },

    #[error("Key field '{field}' given more than once for namespace '{namespace}'")]
    DuplicateKeyField {
        namespace: &'static str,
        field: String,
    },

    #[error("No loader bound to this cache")]
    NoLoader,
}

impl CacheError {
    pub(crate) fn load(key: impl ToString, source: BoxError) -> Self {
        Self::Load {
            key: key.to_string(),
            source: Arc::from(source),
        }
    }

    pub(crate) fn backend(source: BoxError) -> Self {
        Self::Backend(Arc::from(source))
    }

    /// Whether this error is the outcome of a failed load. Such failures are
    /// never cached: the next `get` for the key loads again.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::Load { .. } | Self::NotFound { .. } | Self::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failures_are_classified() {
        assert!(CacheError::load(7, "boom".into()).is_load_failure());
        assert!(CacheError::NotFound { key: "7".into() }.is_load_failure());
        assert!(CacheError::Cancelled { key: "7".into() }.is_load_failure());
        assert!(!CacheError::NoLoader.is_load_failure());
        assert!(!CacheError::backend("disk full".into()).is_load_failure());
        assert!(
            !CacheError::MissingKeyField {
                namespace: "message",
                field: "id"
            }
            .is_load_failure()
        );
    }

    #[test]
    fn cloned_load_error_keeps_source() {
        let err = CacheError::load("message:id=1", "connection refused".into());
        let cloned = err.clone();
        assert_eq!(
            cloned.to_string(),
            "Load error for key message:id=1: connection refused"
        );
        assert!(std::error::Error::source(&cloned).is_some());
    }
}
