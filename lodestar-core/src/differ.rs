//! Address snapshot differ: decides whether a fresh fetch materially changed the
//! routable endpoints. Compares host and port tag only, ignoring order and other metadata.

use std::collections::HashMap;

use crate::instance::ServiceInstance;

/// `true` when `fresh` should replace `cached`. An empty cache always counts as a change.
pub fn needs_update(cached: &[ServiceInstance], fresh: &[ServiceInstance], port_tag: &str) -> bool {
    let fresh_ports: HashMap<&str, Option<&str>> = fresh
        .iter()
        .map(|instance| (instance.host.as_str(), instance.port_tag(port_tag)))
        .collect();

    if cached.is_empty() || cached.len() != fresh.len() {
        return true;
    }

    cached.iter().any(|instance| {
        match fresh_ports.get(instance.host.as_str()) {
            None => true,
            Some(port) => *port != instance.port_tag(port_tag),
        }
    })
}
