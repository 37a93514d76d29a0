//! TTL data cache between UI code and remote fetchers.
//!
//! This module provides the `CacheManager`, which serves stored data while it
//! is fresh and otherwise runs the caller's fetcher, sharing one running fetch
//! among all concurrent callers of the same key.
//!
//! Submodules:
//! - `key`: `CacheKey` builder and `Ttl`
//! - `codec`: JSON envelope `{ version, storedAt, payload }`
//! - `inflight`: per-key fetch deduplication
//! - `manager`: freshness decisions, persistence, stale-if-error

pub mod codec;
pub mod inflight;
pub mod key;
pub mod manager;

pub use codec::CacheEntry;
pub use inflight::InFlightRegistry;
pub use key::{CacheKey, Ttl};
pub use manager::{CacheManager, EntryStatus, Resolved, Source};
