//! Registry instances and the addresses derived from them.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

/// Metadata key carrying the RPC-serving port of an instance.
pub const DEFAULT_PORT_TAG: &str = "gRPC";

/// One registered endpoint as reported by the registry. Never mutated by the resolver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub host: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            metadata: HashMap::new(),
        }
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Shorthand for `with_metadata(DEFAULT_PORT_TAG, port)`.
    pub fn with_port_tag(self, port: impl Into<String>) -> Self {
        self.with_metadata(DEFAULT_PORT_TAG, port)
    }

    /// Raw value of the port tag, if the instance carries one.
    pub fn port_tag(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Concrete (host, port) pair handed to the channel layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub host: String,
    pub port: u16,
}

impl ResolvedAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve the host part into socket addresses. May block on system DNS.
    pub fn to_socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(Iterator::collect)
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Translate instances into addresses. Instances without a usable port tag are
/// skipped and logged; they never fail the whole translation.
pub fn resolve_addresses(
    target: &str,
    instances: &[ServiceInstance],
    port_tag: &str,
) -> Vec<ResolvedAddress> {
    let mut addresses = Vec::with_capacity(instances.len());
    for instance in instances {
        let Some(raw) = instance.port_tag(port_tag) else {
            tracing::error!(target_name = %target, host = %instance.host, tag = %port_tag, "can not find rpc server port tag");
            continue;
        };
        match raw.trim().parse::<u16>() {
            Ok(port) => {
                tracing::info!(target_name = %target, host = %instance.host, port, "found rpc server");
                addresses.push(ResolvedAddress::new(instance.host.clone(), port));
            }
            Err(e) => {
                tracing::warn!(target_name = %target, host = %instance.host, value = %raw, error = %e, "invalid rpc server port tag");
            }
        }
    }
    addresses
}
