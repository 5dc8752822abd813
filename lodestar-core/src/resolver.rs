//! Discovery-backed name resolver.
//!
//! Keeps a channel's address list in sync with a registry. Attempts run on a
//! pooled executor, at most one at a time per resolver; `refresh` calls that
//! arrive while an attempt is in flight are coalesced into it. A fetch whose
//! host/port set matches the cached one produces no notification.
//!
//! All mutable state sits behind one mutex that is only held for state
//! transitions, never across the registry fetch or a listener callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::differ::needs_update;
use crate::instance::{resolve_addresses, ServiceInstance, DEFAULT_PORT_TAG};
use crate::listener::{ResolutionResult, ResolveError, ResolverListener};
use crate::pool::{ResourceKind, SharedHandle, SharedResourcePool};
use crate::registry::RegistryClient;
use crate::ResolverError;

/// Settings already resolved for one target name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Metadata key holding the RPC port of an instance.
    pub port_tag: String,
    /// Re-resolve this long after each completed attempt. `None` leaves
    /// re-resolution entirely to `refresh` callers.
    pub refresh_interval: Option<Duration>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            port_tag: DEFAULT_PORT_TAG.to_string(),
            refresh_interval: None,
        }
    }
}

#[derive(Default)]
struct ResolverState {
    listener: Option<Arc<dyn ResolverListener>>,
    timer: Option<SharedHandle>,
    executor: Option<SharedHandle>,
    resolving: bool,
    shutdown: bool,
    pending: Option<JoinHandle<()>>,
    cached: Vec<ServiceInstance>,
}

struct Inner {
    target: String,
    registry: Arc<dyn RegistryClient>,
    pool: Arc<SharedResourcePool>,
    config: ResolverConfig,
    state: Mutex<ResolverState>,
}

/// Clears the single-flight flag when an attempt ends, including on unwind or cancellation.
struct ResolvingGuard<'a>(&'a Inner);

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().resolving = false;
    }
}

pub struct DiscoveryNameResolver {
    inner: Arc<Inner>,
}

impl DiscoveryNameResolver {
    pub fn new(
        target: impl Into<String>,
        registry: Arc<dyn RegistryClient>,
        pool: Arc<SharedResourcePool>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target: target.into(),
                registry,
                pool,
                config,
                state: Mutex::new(ResolverState::default()),
            }),
        }
    }

    /// The target name this resolver queries the registry with.
    pub fn service_authority(&self) -> &str {
        &self.inner.target
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    /// Set the listener, take pooled runtimes and kick off the first attempt.
    /// A listener can be set only once per resolver.
    pub fn start<L>(&self, listener: L) -> Result<(), ResolverError>
    where
        L: ResolverListener + 'static,
    {
        let mut state = self.inner.lock();
        if state.listener.is_some() {
            return Err(ResolverError::IllegalState("already started"));
        }
        if state.shutdown {
            return Err(ResolverError::IllegalState("resolver is shut down"));
        }

        let timer = self.inner.pool.acquire(ResourceKind::Timer)?;
        let executor = match self.inner.pool.acquire(ResourceKind::Executor) {
            Ok(executor) => executor,
            Err(e) => {
                self.inner.release(timer);
                return Err(e.into());
            }
        };
        state.timer = Some(timer);
        state.executor = Some(executor);
        state.listener = Some(Arc::new(listener));
        tracing::debug!(target_name = %self.inner.target, "resolver started");

        Inner::trigger_resolution(&self.inner, &mut state);
        Ok(())
    }

    /// Re-resolve now. Coalesced into the in-flight attempt if there is one;
    /// a no-op before `start` and after `shutdown`.
    pub fn refresh(&self) {
        let mut state = self.inner.lock();
        if state.listener.is_some() {
            Inner::trigger_resolution(&self.inner, &mut state);
        }
    }

    /// Stop resolving and hand the pooled runtimes back. Idempotent; the
    /// listener is not told.
    pub fn shutdown(&self) {
        let (timer, executor) = {
            let mut state = self.inner.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.listener = None;
            (state.timer.take(), state.executor.take())
        };

        for handle in [timer, executor].into_iter().flatten() {
            self.inner.release(handle);
        }
        tracing::debug!(target_name = %self.inner.target, "resolver shut down");
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().listener.is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn is_resolving(&self) -> bool {
        self.inner.lock().resolving
    }

    /// Snapshot of the last applied instance list.
    pub fn cached_instances(&self) -> Vec<ServiceInstance> {
        self.inner.lock().cached.clone()
    }
}

impl Drop for DiscoveryNameResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, handle: SharedHandle) {
        let kind = handle.kind();
        if let Err(e) = self.pool.release(handle) {
            tracing::warn!(target_name = %self.target, kind = kind.as_str(), error = %e, "failed to release pooled runtime");
        }
    }

    fn trigger_resolution(this: &Arc<Self>, state: &mut ResolverState) {
        if state.resolving || state.shutdown {
            return;
        }
        let Some(executor) = state.executor.as_ref() else {
            return;
        };
        state.resolving = true;
        let inner = Arc::clone(this);
        executor.spawn(async move { inner.run_attempt().await });
    }

    async fn run_attempt(self: Arc<Self>) {
        let guard = ResolvingGuard(&self);

        let listener = {
            let mut state = self.lock();
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            if state.shutdown {
                return;
            }
            match state.listener.clone() {
                Some(listener) => listener,
                None => return,
            }
        };

        let result = match self.registry.fetch_instances(&self.target).await {
            Err(e) => {
                tracing::warn!(target_name = %self.target, error = %e, "registry fetch failed");
                Some(ResolutionResult::ResolutionFailed(ResolveError::unavailable(
                    &self.target,
                    e,
                )))
            }
            Ok(fresh) if fresh.is_empty() => {
                tracing::warn!(target_name = %self.target, "registry returned no instances");
                Some(ResolutionResult::ResolutionFailed(
                    ResolveError::unavailable_empty(&self.target),
                ))
            }
            Ok(fresh) => self.apply(fresh),
        };

        if let Some(result) = result {
            if self.lock().shutdown {
                tracing::debug!(target_name = %self.target, "resolver shut down during attempt, dropping result");
                return;
            }
            listener.on_result(result);
        }

        drop(guard);
        self.schedule_refresh();
    }

    /// Replace the cache if the differ reports a change; `None` means nothing to notify.
    fn apply(&self, fresh: Vec<ServiceInstance>) -> Option<ResolutionResult> {
        let mut state = self.lock();
        if state.shutdown {
            return None;
        }
        if !needs_update(&state.cached, &fresh, &self.config.port_tag) {
            tracing::trace!(target_name = %self.target, "server list unchanged");
            return None;
        }

        tracing::info!(target_name = %self.target, instances = fresh.len(), "ready to update server list");
        state.cached = fresh;
        let addresses = resolve_addresses(&self.target, &state.cached, &self.config.port_tag);
        Some(ResolutionResult::AddressesResolved(addresses))
    }

    fn schedule_refresh(self: &Arc<Self>) {
        let Some(interval) = self.config.refresh_interval else {
            return;
        };
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        let Some(timer) = state.timer.as_ref() else {
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let task = timer.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock();
                state.pending = None;
                Inner::trigger_resolution(&inner, &mut state);
            }
        });
        if let Some(previous) = state.pending.replace(task) {
            previous.abort();
        }
    }
}
