//! Binding layer between the cache manager and a reactive UI component.
//!
//! A `Binding` plays the role of a data hook: the component calls `bind` with
//! its current key and fetcher every time it renders, reads `snapshot()` (or
//! listens on `subscribe()`), and wires `refresh()` to pull-to-refresh.
//!
//! Two lifecycle flavors are supported through `BindingOptions::auto_fetch`:
//! - auto: a new non-empty key starts a resolve right away
//! - manual: nothing loads until the caller invokes `fetch()`
//!
//! Every state write is tagged with the epoch it was issued under. Changing the
//! key or unmounting bumps the epoch, so a late result for an old key still
//! lands in the shared cache but never in this component's state.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{CacheKey, CacheManager, Ttl};
use crate::error::CacheError;

/// Zero-argument async data source. Invoked at most once per refresh cycle.
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Wrap an async closure as a `Fetcher`.
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Error,
    Unmounted,
}

#[derive(Debug, Clone)]
pub struct BindingState<T> {
    pub key: Option<CacheKey>,
    pub data: Option<T>,
    pub loading: bool,
    /// Last failure. Set next to `data` when stale data is being served.
    pub error: Option<CacheError>,
    pub phase: Phase,
    pub epoch: u64,
}

impl<T> Default for BindingState<T> {
    fn default() -> Self {
        Self {
            key: None,
            data: None,
            loading: false,
            error: None,
            phase: Phase::Idle,
            epoch: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BindingOptions {
    pub auto_fetch: bool,
    pub ttl: Ttl,
}

impl BindingOptions {
    pub fn auto(ttl: Ttl) -> Self {
        Self {
            auto_fetch: true,
            ttl,
        }
    }

    pub fn manual(ttl: Ttl) -> Self {
        Self {
            auto_fetch: false,
            ttl,
        }
    }
}

pub struct Binding<T> {
    manager: CacheManager,
    options: BindingOptions,
    state: Arc<watch::Sender<BindingState<T>>>,
    fetcher: Mutex<Option<Fetcher<T>>>,
}

impl<T> Binding<T> {
    pub fn options(&self) -> BindingOptions {
        self.options
    }

    pub fn subscribe(&self) -> watch::Receiver<BindingState<T>> {
        self.state.subscribe()
    }

    /// Detach from the component. Results still in flight are dropped.
    pub fn unmount(&self) {
        self.state.send_if_modified(|s| {
            if s.phase == Phase::Unmounted {
                return false;
            }
            s.epoch += 1;
            s.phase = Phase::Unmounted;
            s.loading = false;
            true
        });
    }
}

impl<T> Binding<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(manager: CacheManager, options: BindingOptions) -> Self {
        let (state, _) = watch::channel(BindingState::default());
        Self {
            manager,
            options,
            state: Arc::new(state),
            fetcher: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> BindingState<T> {
        self.state.borrow().clone()
    }

    /// Associate the binding with `key` and the fetcher that produces it.
    ///
    /// Re-binding the current key only swaps the fetcher. A different key
    /// resets the state; in auto mode a non-empty key also starts a resolve,
    /// whose task handle is returned. The state is already `Loading` when
    /// this returns in that case.
    pub fn bind(&self, key: Option<CacheKey>, fetcher: Fetcher<T>) -> Option<JoinHandle<()>> {
        *self.fetcher.lock() = Some(fetcher);
        let starts_load = self.options.auto_fetch && key.is_some();

        let mut epoch = None;
        self.state.send_if_modified(|s| {
            if s.phase == Phase::Unmounted || s.key == key {
                return false;
            }
            s.epoch += 1;
            s.key = key.clone();
            s.data = None;
            s.error = None;
            s.loading = starts_load;
            s.phase = if starts_load { Phase::Loading } else { Phase::Idle };
            epoch = Some(s.epoch);
            true
        });

        let epoch = epoch?;
        debug!(key = ?key, epoch, "Binding key changed");
        match key {
            Some(key) if starts_load => {
                let task = self.load(epoch, key, false)?;
                Some(tokio::spawn(task))
            }
            _ => None,
        }
    }

    /// Resolve the current key now. This is the trigger for manual mode.
    pub async fn fetch(&self) {
        if let Some(task) = self.current().and_then(|(epoch, key)| self.load(epoch, key, false)) {
            task.await;
        }
    }

    /// Refetch the current key regardless of freshness.
    pub async fn refresh(&self) {
        if let Some(task) = self.current().and_then(|(epoch, key)| self.load(epoch, key, true)) {
            task.await;
        }
    }

    fn current(&self) -> Option<(u64, CacheKey)> {
        let state = self.state.borrow();
        match (&state.key, state.phase) {
            (_, Phase::Unmounted) => None,
            (Some(key), _) => Some((state.epoch, key.clone())),
            (None, _) => None,
        }
    }

    fn load(&self, epoch: u64, key: CacheKey, force: bool) -> Option<BoxFuture<'static, ()>> {
        let fetcher = self.fetcher.lock().clone()?;
        let manager = self.manager.clone();
        let state = Arc::clone(&self.state);
        let ttl = self.options.ttl;

        Some(
            async move {
                let started = state.send_if_modified(|s| {
                    if s.epoch != epoch {
                        return false;
                    }
                    s.loading = true;
                    s.phase = Phase::Loading;
                    true
                });
                if !started {
                    debug!(key = %key, epoch, "Binding moved on before load started");
                    return;
                }

                let call = move || fetcher();
                let outcome = if force {
                    manager.force_refresh(&key, call).await.map(Some)
                } else {
                    manager.resolve(Some(&key), call, ttl).await
                };

                let applied = state.send_if_modified(|s| {
                    if s.epoch != epoch {
                        return false;
                    }
                    s.loading = false;
                    match outcome {
                        Ok(Some(resolved)) => {
                            s.error = resolved.error().cloned();
                            s.data = Some(resolved.data);
                            s.phase = Phase::Ready;
                        }
                        Ok(None) => s.phase = Phase::Idle,
                        Err(e) => {
                            s.error = Some(e);
                            s.phase = Phase::Error;
                        }
                    }
                    true
                });
                if !applied {
                    debug!(key = %key, epoch, "Discarding result for superseded binding");
                }
            }
            .boxed(),
        )
    }
}

impl<T> Drop for Binding<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}
