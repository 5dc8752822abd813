//! Channel configuration: per-target overrides with a default fallback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use lodestar_core::{PoolConfig, ResolverConfig, DEFAULT_PORT_TAG};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings for one target name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Metadata key holding the RPC port.
    pub port_tag: String,
    /// Periodic re-resolution; unset means refresh-driven only.
    pub refresh_interval_secs: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port_tag: DEFAULT_PORT_TAG.to_string(),
            refresh_interval_secs: None,
        }
    }
}

impl ChannelConfig {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            port_tag: self.port_tag.clone(),
            refresh_interval: self.refresh_interval_secs.map(Duration::from_secs),
        }
    }
}

static DEFAULT_CHANNEL: LazyLock<ChannelConfig> = LazyLock::new(ChannelConfig::default);

/// All channels: `client` maps target name -> overrides. Example:
///
/// ```json
/// { "client": { "orders": { "port_tag": "rpc", "refresh_interval_secs": 30 } },
///   "pool": { "executor_threads": 4 } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub client: HashMap<String, ChannelConfig>,
    pub pool: PoolConfig,
}

impl ChannelsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override for one target.
    pub fn channel_override(mut self, name: impl Into<String>, config: ChannelConfig) -> Self {
        self.client.insert(name.into(), config);
        self
    }

    /// Settings for `name`, or the defaults when there is no override.
    pub fn channel(&self, name: &str) -> &ChannelConfig {
        self.client.get(name).unwrap_or(&DEFAULT_CHANNEL)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_slice(&bytes)
    }
}
