//! Persistent key-value storage behind the cache.
//!
//! The cache only needs three string operations from its backing medium.
//! Two backends ship with the crate:
//! - `MemoryStore`: in-process map, useful for tests and short-lived tools
//! - `FileStore`: one JSON file per key under a cache directory

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Async string key-value store.
///
/// Implementations may be shared between many readers; the cache manager is
/// the only writer.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// Every key currently stored. Only needed by maintenance tooling.
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable(
            "this store cannot enumerate keys".to_string(),
        ))
    }
}
