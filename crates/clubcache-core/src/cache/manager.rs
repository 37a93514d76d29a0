//! Cache manager: decides when to trust stored data and when to fetch.
//!
//! Flow for `resolve`:
//! 1. no key yet: nothing happens
//! 2. fresh entry in the store: served as-is, no fetch, no write
//! 3. otherwise the fetcher runs through the in-flight registry, the result
//!    is persisted with `stored_at = now` and returned
//! 4. if that fetch fails and any older entry exists, the older payload is
//!    served and the failure travels alongside it in `Source::Stale`
//!
//! Work registered in step 3 first re-reads the store. A caller whose read
//! finished after another caller's fetch had already settled would otherwise
//! start a second fetch for data that was just written.

use std::any::{type_name, Any};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, de::IgnoredAny, Serialize};
use tracing::{debug, info, warn};

use super::codec::{self, CacheEntry};
use super::inflight::InFlightRegistry;
use super::key::{CacheKey, Ttl};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::store::PersistentStore;

type SharedPayload = Arc<dyn Any + Send + Sync>;
type FetchOutcome = std::result::Result<SharedPayload, CacheError>;

/// What a caller found in the store before registering a fetch.
#[derive(Debug, Clone, Copy)]
struct Seen {
    stored_at: Option<DateTime<Utc>>,
    /// Freshness window of a `resolve`; `None` for forced refreshes
    ttl: Option<Ttl>,
}

impl Seen {
    /// Whether `entry` was written after this caller looked, or is fresh
    /// enough that fetching again would be wasted.
    fn superseded_by<T>(&self, entry: &CacheEntry<T>, now: DateTime<Utc>) -> bool {
        let newer = self.stored_at.map_or(true, |seen| entry.stored_at > seen);
        newer || self.ttl.is_some_and(|ttl| entry.is_fresh(ttl, now))
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone)]
pub enum Source {
    /// Fresh entry, no fetch happened
    Cache,
    /// Fetched (or joined an in-flight fetch) and persisted
    Fetched,
    /// Refresh failed; this is the last known good payload
    Stale { error: CacheError },
}

#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub data: T,
    pub stored_at: DateTime<Utc>,
    pub source: Source,
}

impl<T> Resolved<T> {
    fn new(entry: CacheEntry<T>, source: Source) -> Self {
        Self {
            data: entry.payload,
            stored_at: entry.stored_at,
            source,
        }
    }

    /// Refresh failure reported next to stale data.
    pub fn error(&self) -> Option<&CacheError> {
        match &self.source {
            Source::Stale { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.source, Source::Stale { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Missing,
    Fresh { age: Duration },
    Stale { age: Duration },
}

/// Owns the store handle and the in-flight registry. Cheap to clone; clones
/// share both.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlightRegistry<FetchOutcome>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.in_flight.is_pending(key.as_str())
    }

    /// Serve `key` from the cache when fresh, otherwise fetch it.
    ///
    /// Returns `Ok(None)` for a missing key without touching the store or
    /// the fetcher. Fails only when the fetch fails and nothing was ever
    /// cached for `key`.
    pub async fn resolve<T, F, Fut>(
        &self,
        key: Option<&CacheKey>,
        fetcher: F,
        ttl: Ttl,
    ) -> Result<Option<Resolved<T>>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let Some(key) = key else {
            debug!("No cache key yet, skipping resolve");
            return Ok(None);
        };

        let now = self.clock.now();
        let cached = match self.read_entry::<T>(key).await {
            Some(entry) if entry.is_fresh(ttl, now) => {
                debug!(key = %key, age_secs = entry.age(now).num_seconds(), "Cache hit");
                return Ok(Some(Resolved::new(entry, Source::Cache)));
            }
            Some(entry) => {
                debug!(key = %key, age_secs = entry.age(now).num_seconds(), ttl = %ttl, "Cache entry stale");
                Some(entry)
            }
            None => {
                debug!(key = %key, "Cache miss");
                None
            }
        };

        let seen = Seen {
            stored_at: cached.as_ref().map(|entry| entry.stored_at),
            ttl: Some(ttl),
        };
        match self.fetch_through(key, fetcher, seen).await {
            Ok(entry) => Ok(Some(Resolved::new(entry, Source::Fetched))),
            Err(error) => Self::fall_back_to_stale(key, cached, error).map(Some),
        }
    }

    /// Fetch `key` regardless of freshness. Still joins a fetch already
    /// running for `key` rather than starting a second one, and reuses an
    /// entry written by a fetch that settled after this call began.
    pub async fn force_refresh<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<Resolved<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        info!(key = %key, "Forced refresh");
        let seen = Seen {
            stored_at: self.read_entry::<T>(key).await.map(|entry| entry.stored_at),
            ttl: None,
        };
        match self.fetch_through(key, fetcher, seen).await {
            Ok(entry) => Ok(Resolved::new(entry, Source::Fetched)),
            Err(error) => {
                let stale = self.read_entry::<T>(key).await;
                Self::fall_back_to_stale(key, stale, error)
            }
        }
    }

    /// Drop the stored entry for `key`. The next `resolve` will fetch.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.store
            .remove_item(key.as_str())
            .await
            .map_err(|e| CacheError::Store {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        info!(key = %key, "Cache entry invalidated");
        Ok(())
    }

    /// Invalidate every stored key. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let keys = self.keys().await?;
        for key in &keys {
            self.invalidate(key).await?;
        }
        Ok(keys.len())
    }

    /// Keys present in the store, for maintenance tooling.
    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        let keys = self.store.keys().await.map_err(|e| CacheError::Store {
            key: "*".to_string(),
            message: e.to_string(),
        })?;
        Ok(keys.into_iter().map(CacheKey::from).collect())
    }

    /// Stored entry for `key`, without fetching.
    pub async fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.read_entry(key).await
    }

    pub async fn status(&self, key: &CacheKey, ttl: Ttl) -> EntryStatus {
        let now = self.clock.now();
        match self.read_entry::<IgnoredAny>(key).await {
            None => EntryStatus::Missing,
            Some(entry) if entry.is_fresh(ttl, now) => EntryStatus::Fresh {
                age: entry.age(now),
            },
            Some(entry) => EntryStatus::Stale {
                age: entry.age(now),
            },
        }
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        read_from(self.store.as_ref(), key).await
    }

    /// Run the fetcher for `key` through the registry. The re-read, the fetch
    /// and the store write form one unit of work, so concurrent callers see
    /// one fetcher call and one write.
    async fn fetch_through<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        seen: Seen,
    ) -> Result<CacheEntry<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let work = fetch_or_reuse(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            key.clone(),
            fetcher,
            seen,
        );
        let outcome = self.in_flight.run(key.as_str(), work).await??;

        outcome
            .downcast_ref::<CacheEntry<T>>()
            .cloned()
            .ok_or_else(|| CacheError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    fn fall_back_to_stale<T>(
        key: &CacheKey,
        stale: Option<CacheEntry<T>>,
        error: CacheError,
    ) -> Result<Resolved<T>> {
        match stale {
            Some(entry) => {
                warn!(key = %key, error = %error, "Serving stale cache entry after failed refresh");
                Ok(Resolved::new(entry, Source::Stale { error }))
            }
            None => Err(error),
        }
    }
}

async fn read_from<T: DeserializeOwned>(
    store: &dyn PersistentStore,
    key: &CacheKey,
) -> Option<CacheEntry<T>> {
    match store.get_item(key.as_str()).await {
        Ok(Some(raw)) => codec::decode(key.as_str(), &raw),
        Ok(None) => None,
        Err(e) => {
            warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Registered unit of work: reuse what a just-settled fetch wrote, or call
/// the fetcher and persist its payload.
async fn fetch_or_reuse<T, F, Fut>(
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    key: CacheKey,
    fetcher: F,
    seen: Seen,
) -> FetchOutcome
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if let Some(entry) = read_from::<T>(store.as_ref(), &key).await {
        if seen.superseded_by(&entry, clock.now()) {
            debug!(key = %key, stored_at = %entry.stored_at, "Entry written by a settled fetch, reusing it");
            let entry: SharedPayload = Arc::new(entry);
            return Ok(entry);
        }
    }

    info!(key = %key, "Fetching from source");
    match fetcher().await {
        Ok(payload) => {
            let stored_at = clock.now();
            persist(store.as_ref(), &key, &payload, stored_at).await;
            let entry: SharedPayload = Arc::new(CacheEntry::new(payload, stored_at));
            Ok(entry)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Fetch failed");
            Err(CacheError::fetch(key.as_str(), e))
        }
    }
}

/// Write a fetched payload. Failures here cost the cache, never the caller.
async fn persist<T: Serialize>(
    store: &dyn PersistentStore,
    key: &CacheKey,
    payload: &T,
    stored_at: DateTime<Utc>,
) {
    let raw = match codec::encode(key.as_str(), payload, stored_at) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key = %key, error = %e, "Payload not cacheable, serving it uncached");
            return;
        }
    };
    if let Err(e) = store.set_item(key.as_str(), &raw).await {
        warn!(key = %key, error = %e, "Failed to persist cache entry");
    }
}
