//! Registry client trait: fetch_instances(service_name) -> instances. Implemented by the facade adapters.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::instance::ServiceInstance;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Unreachable(String),
    #[error("malformed registry response: {0}")]
    Malformed(String),
    #[error("registry error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Source of current instance membership. Implementations: static map, file, Consul, etc.
/// An empty list means nothing is registered right now.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn fetch_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;
}

#[async_trait]
impl<R: RegistryClient + ?Sized> RegistryClient for Arc<R> {
    async fn fetch_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        (**self).fetch_instances(service_name).await
    }
}
