//! clubcache-core - client-side TTL data cache
//!
//! Sits between screens and the remote data service: serves fresh stored data,
//! fetches when stale, shares one running fetch per key among concurrent
//! callers, and falls back to the last good payload when a refresh fails.
//!
//! - `cache`: keys, entry codec, in-flight registry, `CacheManager`
//! - `store`: `PersistentStore` trait with memory and file backends
//! - `binding`: reactive `Binding` for UI components
//! - `api`: REST fetcher for table reads
//! - `config`: on-disk configuration

pub mod api;
pub mod binding;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod store;
pub mod utils;

pub use binding::{fetcher, Binding, BindingOptions, BindingState, Fetcher, Phase};
pub use cache::{CacheEntry, CacheKey, CacheManager, EntryStatus, Resolved, Source, Ttl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::CacheError;
pub use store::{FileStore, MemoryStore, PersistentStore, StoreError};
