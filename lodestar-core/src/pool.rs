//! Shared resource pool: reference-counted timer and executor runtimes shared by
//! every resolver of a process.
//!
//! The first `acquire` of a kind builds a dedicated tokio runtime; later
//! acquires hand out the same runtime and bump its count. The runtime is shut
//! down when the last reference is released, and rebuilt on the next acquire.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

const DEFAULT_EXECUTOR_THREADS: usize = 2;
const DEFAULT_THREAD_NAME_PREFIX: &str = "lodestar";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Delayed work: scheduled re-resolution.
    Timer,
    /// Resolution attempts.
    Executor,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Timer => "timer",
            ResourceKind::Executor => "executor",
        }
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to build {} runtime: {source}", .kind.as_str())]
    Build {
        kind: ResourceKind,
        #[source]
        source: io::Error,
    },
    #[error("{} was never acquired", .0.as_str())]
    NotAcquired(ResourceKind),
    #[error("releasing the wrong {} instance", .0.as_str())]
    WrongInstance(ResourceKind),
}

/// Pool sizing. Deserializable so it can sit in the channels config.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub executor_threads: usize,
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            executor_threads: DEFAULT_EXECUTOR_THREADS,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

/// One counted reference to a pooled runtime. Give it back with [`SharedResourcePool::release`].
#[derive(Clone, Debug)]
pub struct SharedHandle {
    kind: ResourceKind,
    generation: u64,
    handle: Handle,
}

impl SharedHandle {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn runtime(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl PartialEq for SharedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.generation == other.generation
    }
}

struct Entry {
    runtime: Runtime,
    generation: u64,
    refs: usize,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<ResourceKind, Entry>,
    next_generation: u64,
}

pub struct SharedResourcePool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl SharedResourcePool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Take one reference to `kind`, building the runtime if this is the first.
    pub fn acquire(&self, kind: ResourceKind) -> Result<SharedHandle, PoolError> {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(&kind) {
            entry.refs += 1;
            return Ok(SharedHandle {
                kind,
                generation: entry.generation,
                handle: entry.runtime.handle().clone(),
            });
        }

        let runtime = self
            .build_runtime(kind)
            .map_err(|source| PoolError::Build { kind, source })?;
        state.next_generation += 1;
        let generation = state.next_generation;
        let handle = runtime.handle().clone();
        state.entries.insert(
            kind,
            Entry {
                runtime,
                generation,
                refs: 1,
            },
        );
        tracing::debug!(kind = kind.as_str(), generation, "created shared runtime");
        Ok(SharedHandle {
            kind,
            generation,
            handle,
        })
    }

    /// Return one reference. The runtime is shut down when its count reaches zero.
    pub fn release(&self, handle: SharedHandle) -> Result<(), PoolError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&handle.kind)
            .ok_or(PoolError::NotAcquired(handle.kind))?;
        if entry.generation != handle.generation {
            return Err(PoolError::WrongInstance(handle.kind));
        }
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(());
        }

        let removed = state.entries.remove(&handle.kind);
        drop(state);
        if let Some(entry) = removed {
            tracing::debug!(
                kind = handle.kind.as_str(),
                generation = entry.generation,
                "destroying shared runtime"
            );
            entry.runtime.shutdown_background();
        }
        Ok(())
    }

    /// Current number of outstanding references to `kind`.
    pub fn ref_count(&self, kind: ResourceKind) -> usize {
        self.lock().entries.get(&kind).map_or(0, |e| e.refs)
    }

    /// Whether a runtime for `kind` currently exists.
    pub fn is_live(&self, kind: ResourceKind) -> bool {
        self.lock().entries.contains_key(&kind)
    }

    fn build_runtime(&self, kind: ResourceKind) -> io::Result<Runtime> {
        let thread_name = format!("{}-{}", self.config.thread_name_prefix, kind.as_str());
        let mut builder = Builder::new_multi_thread();
        match kind {
            ResourceKind::Timer => builder.worker_threads(1).enable_time(),
            ResourceKind::Executor => builder
                .worker_threads(self.config.executor_threads.max(1))
                .enable_all(),
        };
        builder.thread_name(thread_name).build()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SharedResourcePool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in state.entries.drain() {
            entry.runtime.shutdown_background();
        }
    }
}
