//! RPC channel side: the factory a channel asks for a name resolver.

mod protocol;

pub use protocol::{parse_target, DISCOVERY_SCHEME};

use std::sync::Arc;

use lodestar_core::{DiscoveryNameResolver, RegistryClient, SharedResourcePool};

use crate::config::ChannelsConfig;

/// Builds one [`DiscoveryNameResolver`] per channel target. Every resolver it
/// builds borrows runtimes from the same pool and takes its settings from the
/// channels config.
pub struct DiscoveryResolverFactory {
    registry: Arc<dyn RegistryClient>,
    pool: Arc<SharedResourcePool>,
    channels: ChannelsConfig,
}

impl DiscoveryResolverFactory {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        pool: Arc<SharedResourcePool>,
        channels: ChannelsConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            channels,
        }
    }

    /// Factory with its own pool, sized from `channels.pool`.
    pub fn with_config(registry: Arc<dyn RegistryClient>, channels: ChannelsConfig) -> Self {
        let pool = SharedResourcePool::new(channels.pool.clone());
        Self::new(registry, pool, channels)
    }

    pub fn scheme(&self) -> &'static str {
        DISCOVERY_SCHEME
    }

    /// Authority a channel should use for `target`: the service name.
    pub fn default_authority(&self, target: &str) -> Option<String> {
        parse_target(target).map(str::to_string)
    }

    /// Resolver for `target`, or `None` if the target is not a discovery target.
    /// The resolver is not started.
    pub fn new_resolver(&self, target: &str) -> Option<DiscoveryNameResolver> {
        let name = parse_target(target)?;
        let config = self.channels.channel(name).resolver_config();
        tracing::debug!(target_name = name, port_tag = %config.port_tag, "creating discovery resolver");
        Some(DiscoveryNameResolver::new(
            name,
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            config,
        ))
    }

    pub fn pool(&self) -> &Arc<SharedResourcePool> {
        &self.pool
    }

    pub fn channels(&self) -> &ChannelsConfig {
        &self.channels
    }
}
