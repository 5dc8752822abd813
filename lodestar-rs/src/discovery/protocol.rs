//! Registry client implementations. Trait is in lodestar_core::registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use lodestar_core::{RegistryClient, RegistryError, ServiceInstance};

/// Registry from an in-memory map (service name -> instances). Membership can be
/// changed at runtime, which makes it handy for tests and demos.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    services: RwLock<HashMap<String, Vec<ServiceInstance>>>,
}

impl StaticRegistry {
    pub fn new(services: HashMap<String, Vec<ServiceInstance>>) -> Self {
        Self {
            services: RwLock::new(services),
        }
    }

    /// Build from (name, instances) pairs.
    pub fn from_slice(pairs: &[(&str, Vec<ServiceInstance>)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(name, instances)| ((*name).to_string(), instances.clone()))
                .collect(),
        )
    }

    /// Replace the membership of one service.
    pub fn set_instances(&self, service_name: &str, instances: Vec<ServiceInstance>) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service_name.to_string(), instances);
    }

    pub fn remove(&self, service_name: &str) -> Option<Vec<ServiceInstance>> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_name)
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn fetch_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        Ok(self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Registry backed by a JSON file, re-read on every fetch:
///
/// ```json
/// { "orders": [ { "host": "10.0.0.1", "metadata": { "gRPC": "9000" } } ] }
/// ```
#[derive(Clone, Debug)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl RegistryClient for FileRegistry {
    async fn fetch_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            RegistryError::Unreachable(format!("{}: {e}", self.path.display()))
        })?;
        let mut services: HashMap<String, Vec<ServiceInstance>> = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Malformed(format!("{}: {e}", self.path.display())))?;
        Ok(services.remove(service_name).unwrap_or_default())
    }
}
