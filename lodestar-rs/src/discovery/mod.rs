//! Discovery: registry adapters and DiscoveryModule, the builder for a resolver factory.

mod protocol;

pub use protocol::{FileRegistry, StaticRegistry};

use std::path::PathBuf;
use std::sync::Arc;

use lodestar_core::{RegistryClient, ServiceInstance, SharedResourcePool};

use crate::config::{ChannelsConfig, ConfigError};
use crate::rpc::DiscoveryResolverFactory;

/// Discovery as object: one registry adapter (static, file, or custom) plus
/// channel config. `build()` produces the factory channels ask for resolvers.
pub struct DiscoveryModule {
    adapter: Option<Arc<dyn RegistryClient>>,
    channels: ChannelsConfig,
    config_path: Option<PathBuf>,
    pool: Option<Arc<SharedResourcePool>>,
}

impl DiscoveryModule {
    pub fn new() -> Self {
        Self {
            adapter: None,
            channels: ChannelsConfig::default(),
            config_path: None,
            pool: None,
        }
    }

    /// Static registry: service name -> instances.
    pub fn static_registry(mut self, pairs: &[(&str, Vec<ServiceInstance>)]) -> Self {
        self.adapter = Some(Arc::new(StaticRegistry::from_slice(pairs)));
        self
    }

    /// Registry re-read from a JSON file on every fetch.
    pub fn file_registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.adapter = Some(Arc::new(FileRegistry::new(path)));
        self
    }

    /// Use custom implementation.
    pub fn registry(mut self, impl_: impl RegistryClient + 'static) -> Self {
        self.adapter = Some(Arc::new(impl_));
        self
    }

    /// Use a registry shared with other code.
    pub fn shared_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.adapter = Some(registry);
        self
    }

    pub fn config(mut self, channels: ChannelsConfig) -> Self {
        self.channels = channels;
        self
    }

    /// Load channel config from a JSON file at build time. Overrides `config`.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Share an existing pool instead of creating one from the config.
    pub fn pool(mut self, pool: Arc<SharedResourcePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Result<DiscoveryResolverFactory, ConfigError> {
        let channels = match self.config_path {
            Some(path) => ChannelsConfig::from_path(path)?,
            None => self.channels,
        };
        let registry = self
            .adapter
            .unwrap_or_else(|| Arc::new(StaticRegistry::default()) as Arc<dyn RegistryClient>);
        Ok(match self.pool {
            Some(pool) => DiscoveryResolverFactory::new(registry, pool, channels),
            None => DiscoveryResolverFactory::with_config(registry, channels),
        })
    }
}

impl Default for DiscoveryModule {
    fn default() -> Self {
        Self::new()
    }
}
