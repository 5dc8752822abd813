//! Resolver lifecycle, single-flight and notification behaviour against a fake registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lodestar_core::{
    DiscoveryNameResolver, PoolConfig, RegistryClient, RegistryError, ResolutionResult,
    ResolveError, ResolvedAddress, ResolverConfig, ResolverError, ResourceKind, ServiceInstance,
    SharedResourcePool,
};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::sync::Semaphore;

struct FakeRegistry {
    answer: Mutex<Result<Vec<ServiceInstance>, String>>,
    fetches: AtomicUsize,
    gate: Option<Semaphore>,
}

impl FakeRegistry {
    fn new(instances: Vec<ServiceInstance>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(instances)),
            fetches: AtomicUsize::new(0),
            gate: None,
        })
    }

    /// Every fetch blocks until `open` is called once for it.
    fn gated(instances: Vec<ServiceInstance>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(instances)),
            fetches: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        })
    }

    fn set(&self, instances: Vec<ServiceInstance>) {
        *self.answer.lock().unwrap() = Ok(instances);
    }

    fn fail(&self, message: &str) {
        *self.answer.lock().unwrap() = Err(message.to_string());
    }

    fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn fetch_instances(&self, _service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.answer
            .lock()
            .unwrap()
            .clone()
            .map_err(RegistryError::Unreachable)
    }
}

fn inst(host: &str, port: &str) -> ServiceInstance {
    ServiceInstance::new(host).with_port_tag(port)
}

fn resolver_with(
    registry: &Arc<FakeRegistry>,
    pool: &Arc<SharedResourcePool>,
    config: ResolverConfig,
) -> DiscoveryNameResolver {
    DiscoveryNameResolver::new("orders", registry.clone(), pool.clone(), config)
}

fn resolver(registry: &Arc<FakeRegistry>, pool: &Arc<SharedResourcePool>) -> DiscoveryNameResolver {
    resolver_with(registry, pool, ResolverConfig::default())
}

async fn next(rx: &mut UnboundedReceiver<ResolutionResult>) -> ResolutionResult {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a resolution result")
        .expect("listener channel closed")
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Refresh and wait for that attempt to finish.
async fn refresh_and_settle(resolver: &DiscoveryNameResolver) {
    resolver.refresh();
    wait_until(|| !resolver.is_resolving()).await;
}

fn addresses(result: ResolutionResult) -> Vec<ResolvedAddress> {
    match result {
        ResolutionResult::AddressesResolved(addresses) => addresses,
        ResolutionResult::ResolutionFailed(e) => panic!("expected addresses, got {e}"),
    }
}

fn failure(result: ResolutionResult) -> ResolveError {
    match result {
        ResolutionResult::ResolutionFailed(e) => e,
        ResolutionResult::AddressesResolved(a) => panic!("expected failure, got {a:?}"),
    }
}

#[tokio::test]
async fn start_resolves_and_notifies() {
    let registry = FakeRegistry::new(vec![inst("10.0.0.1", "9000"), inst("10.0.0.2", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    let got = addresses(next(&mut rx).await);
    assert_eq!(
        got,
        vec![
            ResolvedAddress::new("10.0.0.1", 9000),
            ResolvedAddress::new("10.0.0.2", 9000)
        ]
    );
    assert_eq!(resolver.cached_instances().len(), 2);
    assert_eq!(resolver.service_authority(), "orders");
}

#[tokio::test]
async fn refreshes_during_attempt_are_coalesced() {
    let registry = FakeRegistry::gated(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    wait_until(|| registry.fetches() == 1).await;
    for _ in 0..10 {
        resolver.refresh();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.fetches(), 1);

    registry.open();
    addresses(next(&mut rx).await);
    wait_until(|| !resolver.is_resolving()).await;
    assert_eq!(registry.fetches(), 1);

    registry.open();
    refresh_and_settle(&resolver).await;
    assert_eq!(registry.fetches(), 2);
}

#[tokio::test]
async fn identical_host_port_set_does_not_notify() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000"), inst("h2", "9001")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    addresses(next(&mut rx).await);

    refresh_and_settle(&resolver).await;
    registry.set(vec![
        inst("h2", "9001").with_metadata("zone", "b"),
        inst("h1", "9000").with_metadata("version", "2"),
    ]);
    refresh_and_settle(&resolver).await;

    assert_eq!(registry.fetches(), 3);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn port_change_notifies_new_address() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    addresses(next(&mut rx).await);

    registry.set(vec![inst("h1", "9001")]);
    resolver.refresh();
    assert_eq!(addresses(next(&mut rx).await), vec![ResolvedAddress::new("h1", 9001)]);
}

#[tokio::test]
async fn size_change_notifies() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000"), inst("h2", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    assert_eq!(addresses(next(&mut rx).await).len(), 2);

    registry.set(vec![inst("h1", "9000"), inst("h2", "9000"), inst("h3", "9000")]);
    resolver.refresh();
    assert_eq!(addresses(next(&mut rx).await).len(), 3);
}

#[tokio::test]
async fn empty_list_is_unavailable_and_keeps_cache() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    addresses(next(&mut rx).await);

    registry.set(Vec::new());
    resolver.refresh();
    let err = failure(next(&mut rx).await);
    assert!(matches!(err, ResolveError::Unavailable { .. }));
    assert_eq!(err.target(), "orders");
    assert!(err.to_string().contains("empty list"));
    wait_until(|| !resolver.is_resolving()).await;
    assert_eq!(resolver.cached_instances(), vec![inst("h1", "9000")]);

    // The old set again is not a first resolution.
    registry.set(vec![inst("h1", "9000")]);
    refresh_and_settle(&resolver).await;
    assert_eq!(registry.fetches(), 3);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn registry_failure_is_unavailable_with_cause() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    registry.fail("connection refused");
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    let err = failure(next(&mut rx).await);
    assert!(err.cause().to_string().contains("connection refused"));
    wait_until(|| !resolver.is_resolving()).await;
    assert!(resolver.cached_instances().is_empty());

    // Recovery is driven by refresh and counts as the first resolution.
    registry.set(vec![inst("h1", "9000")]);
    resolver.refresh();
    assert_eq!(addresses(next(&mut rx).await), vec![ResolvedAddress::new("h1", 9000)]);
}

#[tokio::test]
async fn instance_without_port_tag_is_skipped() {
    let registry = FakeRegistry::new(vec![inst("h1", "8080"), ServiceInstance::new("h2")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    assert_eq!(addresses(next(&mut rx).await), vec![ResolvedAddress::new("h1", 8080)]);
}

#[tokio::test]
async fn no_usable_port_tags_still_reports_success() {
    let registry = FakeRegistry::new(vec![
        ServiceInstance::new("h1"),
        ServiceInstance::new("h2").with_port_tag("http"),
    ]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    assert!(addresses(next(&mut rx).await).is_empty());
}

#[tokio::test]
async fn custom_port_tag() {
    let registry = FakeRegistry::new(vec![ServiceInstance::new("h1").with_metadata("rpc", "7000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let config = ResolverConfig {
        port_tag: "rpc".to_string(),
        ..ResolverConfig::default()
    };
    let resolver = resolver_with(&registry, &pool, config);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    assert_eq!(addresses(next(&mut rx).await), vec![ResolvedAddress::new("h1", 7000)]);
}

#[tokio::test]
async fn shutdown_is_idempotent_and_releases_once() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let first = resolver(&registry, &pool);
    let second = resolver(&registry, &pool);
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();

    first.start(tx1).unwrap();
    second.start(tx2).unwrap();
    addresses(next(&mut rx1).await);
    addresses(next(&mut rx2).await);
    assert_eq!(pool.ref_count(ResourceKind::Timer), 2);
    assert_eq!(pool.ref_count(ResourceKind::Executor), 2);

    first.shutdown();
    first.shutdown();
    assert!(first.is_shutdown());
    assert!(!first.is_started());
    assert_eq!(pool.ref_count(ResourceKind::Timer), 1);
    assert_eq!(pool.ref_count(ResourceKind::Executor), 1);

    let fetches = registry.fetches();
    first.refresh();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.fetches(), fetches);

    second.shutdown();
    assert!(!pool.is_live(ResourceKind::Timer));
    assert!(!pool.is_live(ResourceKind::Executor));
}

#[tokio::test]
async fn shutdown_during_attempt_drops_the_result() {
    let registry = FakeRegistry::gated(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    // Keep the executor alive past shutdown so the attempt runs to completion.
    let executor = pool.acquire(ResourceKind::Executor).unwrap();
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    wait_until(|| registry.fetches() == 1).await;
    resolver.shutdown();
    registry.open();

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
    assert!(matches!(outcome, Ok(None)));
    assert!(resolver.cached_instances().is_empty());
    pool.release(executor).unwrap();
}

#[tokio::test]
async fn second_start_is_rejected() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx.clone()).unwrap();
    let err = resolver.start(tx).unwrap_err();
    assert!(matches!(err, ResolverError::IllegalState(_)));
    assert_eq!(pool.ref_count(ResourceKind::Executor), 1);
    addresses(next(&mut rx).await);
}

#[tokio::test]
async fn start_after_shutdown_is_rejected() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let (tx, _rx) = mpsc::unbounded_channel();

    resolver.shutdown();
    let err = resolver.start(tx).unwrap_err();
    assert!(matches!(err, ResolverError::IllegalState(_)));
    assert!(!pool.is_live(ResourceKind::Executor));
    assert_eq!(registry.fetches(), 0);
}

#[tokio::test]
async fn refresh_before_start_is_noop() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);

    resolver.refresh();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.fetches(), 0);
    assert!(!resolver.is_started());
}

#[tokio::test]
async fn drop_releases_pooled_runtimes() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let resolver = resolver(&registry, &pool);
        resolver.start(tx).unwrap();
        addresses(next(&mut rx).await);
    }
    assert_eq!(pool.ref_count(ResourceKind::Timer), 0);
    assert_eq!(pool.ref_count(ResourceKind::Executor), 0);
}

#[tokio::test]
async fn refresh_interval_picks_up_changes() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let config = ResolverConfig {
        refresh_interval: Some(Duration::from_millis(20)),
        ..ResolverConfig::default()
    };
    let resolver = resolver_with(&registry, &pool, config);
    let (tx, mut rx) = mpsc::unbounded_channel();

    resolver.start(tx).unwrap();
    addresses(next(&mut rx).await);

    registry.set(vec![inst("h1", "9001")]);
    assert_eq!(addresses(next(&mut rx).await), vec![ResolvedAddress::new("h1", 9001)]);

    resolver.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fetches = registry.fetches();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.fetches(), fetches);
}

#[tokio::test]
async fn closure_listener() {
    let registry = FakeRegistry::new(vec![inst("h1", "9000")]);
    let pool = SharedResourcePool::new(PoolConfig::default());
    let resolver = resolver(&registry, &pool);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    resolver
        .start(lodestar_core::listener_fn(move |result: ResolutionResult| {
            sink.lock().unwrap().push(result);
        }))
        .unwrap();
    wait_until(|| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(seen.lock().unwrap()[0].addresses().unwrap().len(), 1);
}
