//! Per-key deduplication of running fetches.
//!
//! The first caller for a key spawns the work on the tokio runtime and
//! registers a shared handle to it; later callers for the same key await that
//! handle instead of starting their own. The registration is removed by the
//! task itself once the work settles, before any waiter sees the outcome.
//!
//! Because the work runs as its own task, it completes even when every
//! waiter has gone away, so its result still lands in the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::CacheError;

type Pending<V> = Shared<BoxFuture<'static, Option<V>>>;
type PendingMap<V> = Arc<Mutex<HashMap<String, Pending<V>>>>;

pub struct InFlightRegistry<V> {
    pending: PendingMap<V>,
}

impl<V> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<V> Clone for InFlightRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<V> InFlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `work` for `key` unless a run for `key` is already pending, in
    /// which case its outcome is shared and `work` is dropped unpolled.
    ///
    /// Nothing supplied by the caller executes while the registry lock is
    /// held, so `work` may itself query this registry.
    pub async fn run<Fut>(&self, key: &str, work: Fut) -> Result<V, CacheError>
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let pending = {
            let mut map = self.pending.lock();
            match map.get(key) {
                Some(existing) => {
                    debug!(key = key, "Joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    let guard = Deregister {
                        pending: Arc::clone(&self.pending),
                        key: key.to_string(),
                    };
                    let handle = tokio::spawn(async move {
                        let outcome = work.await;
                        drop(guard);
                        outcome
                    });
                    let shared = handle.map(Result::ok).boxed().shared();
                    map.insert(key.to_string(), shared.clone());
                    shared
                }
            }
        };

        pending.await.ok_or_else(|| {
            error!(key = key, "In-flight fetch task aborted or panicked");
            CacheError::Cancelled {
                key: key.to_string(),
            }
        })
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Removes a registration when the work finishes, panics, or is dropped.
struct Deregister<V> {
    pending: PendingMap<V>,
    key: String,
}

impl<V> Drop for Deregister<V> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_share_one_invocation() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let runs = (0..5).map(|_| {
            let calls = Arc::clone(&calls);
            let registry = registry.clone();
            async move {
                registry
                    .run("coach_abc", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        7
                    })
                    .await
            }
        });
        let results = futures::future::join_all(runs).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(7))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_registration_removed_after_settle() {
        let registry: InFlightRegistry<Result<u32, CacheError>> = InFlightRegistry::new();

        let out = registry
            .run("k", async { Err(CacheError::fetch("k", anyhow::anyhow!("down"))) })
            .await
            .unwrap();
        assert!(out.is_err());
        assert!(!registry.is_pending("k"));

        // A later run starts fresh work
        let out = registry.run("k", async { Ok(2) }).await.unwrap();
        assert_eq!(out.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_run_independently() {
        let registry: InFlightRegistry<&'static str> = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let calls = Arc::clone(&calls);
            registry.run("a", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                "a"
            })
        };
        let b = {
            let calls = Arc::clone(&calls);
            registry.run("b", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                "b"
            })
        };
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_work_reports_cancelled_and_deregisters() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();

        let out = registry
            .run("boom", async {
                let explode = true;
                if explode {
                    panic!("fetcher exploded");
                }
                0
            })
            .await;

        assert!(matches!(out, Err(CacheError::Cancelled { .. })));
        assert!(!registry.is_pending("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_finishes_after_waiter_dropped() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();
        let done = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let done = Arc::clone(&done);
            registry.run("slow", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
                1
            })
        };
        // Poll once so the work is spawned, then drop the waiter
        let _ = tokio::time::timeout(Duration::from_millis(1), waiter).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_work_may_query_the_registry() {
        let registry: InFlightRegistry<bool> = InFlightRegistry::new();
        let inner = registry.clone();

        let saw_itself = registry
            .run("teams", async move { inner.is_pending("teams") })
            .await
            .unwrap();

        assert!(saw_itself);
        assert!(registry.is_empty());
    }
}
