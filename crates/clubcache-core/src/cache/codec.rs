//! Serialized form of cache entries.
//!
//! Every entry is stored as a JSON envelope:
//!
//! ```json
//! { "version": 1, "storedAt": "2024-05-01T12:00:00Z", "payload": { ... } }
//! ```
//!
//! Decoding never fails loudly: a truncated, malformed, or foreign-version
//! envelope is reported as a cache miss.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::key::Ttl;
use crate::error::CacheError;
use crate::utils::format_age;

/// Envelope schema version written by this crate.
pub const ENTRY_VERSION: u32 = 1;

/// A payload together with the moment it was last confirmed by the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, stored_at: DateTime<Utc>) -> Self {
        Self { payload, stored_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    /// Fresh iff `now - stored_at < ttl`.
    pub fn is_fresh(&self, ttl: Ttl, now: DateTime<Utc>) -> bool {
        if ttl.is_never_fresh() {
            return false;
        }
        self.age(now) < ttl.as_chrono()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        format_age(self.age(now).num_minutes())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a, T> {
    version: u32,
    stored_at: DateTime<Utc>,
    payload: &'a T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    version: u32,
    stored_at: DateTime<Utc>,
    payload: T,
}

/// Wrap `payload` with its timestamp and serialize it.
pub fn encode<T: Serialize>(
    key: &str,
    payload: &T,
    stored_at: DateTime<Utc>,
) -> Result<String, CacheError> {
    let envelope = EnvelopeRef {
        version: ENTRY_VERSION,
        stored_at,
        payload,
    };
    serde_json::to_string(&envelope).map_err(|e| CacheError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parse a stored envelope. Anything unreadable is a miss.
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<CacheEntry<T>> {
    let envelope: Envelope<T> = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(key = key, error = %e, "Discarding unreadable cache entry");
            return None;
        }
    };

    if envelope.version != ENTRY_VERSION {
        debug!(
            key = key,
            version = envelope.version,
            expected = ENTRY_VERSION,
            "Discarding cache entry from another schema version"
        );
        return None;
    }

    Some(CacheEntry::new(envelope.payload, envelope.stored_at))
}
