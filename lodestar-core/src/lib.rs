//! Lodestar core: registry-backed name resolution for RPC channels.
//!
//! A [`DiscoveryNameResolver`] keeps a channel's address list in sync with a
//! [`RegistryClient`], running attempts on runtimes borrowed from a
//! [`SharedResourcePool`] and reporting to a [`ResolverListener`].

pub mod differ;
pub mod instance;
pub mod listener;
pub mod pool;
pub mod registry;
pub mod resolver;

pub use differ::needs_update;
pub use instance::{resolve_addresses, ResolvedAddress, ServiceInstance, DEFAULT_PORT_TAG};
pub use listener::{listener_fn, FnListener, ResolutionResult, ResolveError, ResolverListener};
pub use pool::{PoolConfig, PoolError, ResourceKind, SharedHandle, SharedResourcePool};
pub use registry::{RegistryClient, RegistryError};
pub use resolver::{DiscoveryNameResolver, ResolverConfig};

use thiserror::Error;

/// Errors returned synchronously by resolver lifecycle calls.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    #[error(transparent)]
    Pool(#[from] PoolError),
}
