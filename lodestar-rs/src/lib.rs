//! Lodestar Rust facade: channel config, DiscoveryModule and the resolver factory on lodestar-core.

pub mod config;
pub mod discovery;
pub mod rpc;

pub use config::{ChannelConfig, ChannelsConfig, ConfigError};
pub use discovery::{DiscoveryModule, FileRegistry, StaticRegistry};
pub use rpc::{parse_target, DiscoveryResolverFactory, DISCOVERY_SCHEME};

pub use lodestar_core::{
    DiscoveryNameResolver, PoolConfig, RegistryClient, RegistryError, ResolutionResult,
    ResolveError, ResolvedAddress, ResolverConfig, ResolverError, ResolverListener,
    ResourceKind, ServiceInstance, SharedResourcePool,
};
