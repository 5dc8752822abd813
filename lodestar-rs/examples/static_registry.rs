//! Example: resolve a target from a static registry, then watch it change.

use std::sync::Arc;

use lodestar_rs::{ChannelsConfig, DiscoveryResolverFactory, ServiceInstance, StaticRegistry};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(StaticRegistry::from_slice(&[(
        "orders",
        vec![
            ServiceInstance::new("127.0.0.1").with_port_tag("9000"),
            ServiceInstance::new("127.0.0.2").with_port_tag("9000"),
        ],
    )]));
    let factory = DiscoveryResolverFactory::with_config(registry.clone(), ChannelsConfig::default());
    let resolver = factory
        .new_resolver("discovery://orders")
        .ok_or("not a discovery target")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    resolver.start(tx)?;
    println!("{:?}", rx.recv().await);

    registry.set_instances("orders", vec![ServiceInstance::new("127.0.0.3").with_port_tag("9100")]);
    resolver.refresh();
    println!("{:?}", rx.recv().await);

    resolver.shutdown();
    Ok(())
}
