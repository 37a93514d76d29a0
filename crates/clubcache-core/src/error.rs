//! Error types for the data cache.
//!
//! `CacheError` is `Clone` so that one in-flight fetch outcome can be handed
//! to every caller waiting on it.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Failed to serialize cache entry for {key}: {message}")]
    Serialization { key: String, message: String },

    #[error("Fetch failed for {key}: {cause}")]
    Fetch {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Store failure for {key}: {message}")]
    Store { key: String, message: String },

    #[error("Shared result for {key} is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Fetch task for {key} did not complete")]
    Cancelled { key: String },
}

impl CacheError {
    pub fn fetch(key: &str, cause: anyhow::Error) -> Self {
        CacheError::Fetch {
            key: key.to_string(),
            cause: Arc::new(cause),
        }
    }

    /// Key the failing operation was issued for.
    pub fn key(&self) -> &str {
        match self {
            CacheError::Serialization { key, .. }
            | CacheError::Fetch { key, .. }
            | CacheError::Store { key, .. }
            | CacheError::TypeMismatch { key, .. }
            | CacheError::Cancelled { key } => key,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, CacheError::Fetch { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_includes_cause() {
        let err = CacheError::fetch("teams_42", anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "Fetch failed for teams_42: connection reset");
        assert!(err.is_fetch());
        assert_eq!(err.key(), "teams_42");
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = CacheError::fetch("k", anyhow::anyhow!("boom"));
        let copy = err.clone();
        match (err, copy) {
            (CacheError::Fetch { cause: a, .. }, CacheError::Fetch { cause: b, .. }) => {
                assert!(Arc::ptr_eq(&a, &b));
            }
            _ => panic!("expected fetch errors"),
        }
    }
}
