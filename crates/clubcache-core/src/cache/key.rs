//! Cache keys and time-to-live values.

use std::fmt;
use std::time::Duration;

/// Separator placed between key parts, e.g. `coach_abc`.
const KEY_SEPARATOR: char = '_';

/// Opaque identifier of a cached resource.
///
/// Equal strings name the same resource. Callers compose keys from their own
/// identifiers (club id, refresh token, ...); the cache never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start a key from its scope, e.g. `"coach"` or `"budget"`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    /// Append one identifier part.
    pub fn with(mut self, part: impl fmt::Display) -> Self {
        self.0.push(KEY_SEPARATOR);
        self.0.push_str(&part.to_string());
        self
    }

    /// Key that is not ready yet maps to `None`, as does an empty string.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            Some(s) if !s.is_empty() => Some(Self(s.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How long an entry stays fresh. Zero or negative means never fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ttl(i64);

impl Ttl {
    pub const NEVER_FRESH: Ttl = Ttl(0);

    pub const fn secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn minutes(minutes: i64) -> Self {
        Self(minutes * 60)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn is_never_fresh(&self) -> bool {
        self.0 <= 0
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.0.max(0))
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Self(i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
