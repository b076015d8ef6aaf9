//! Partition Router
//!
//! Client-side entry point. Hashes each `(region, key)` to the partition
//! owning it and forwards the operation there; whole-cache operations fan
//! out to every partition.

mod local;
mod topology;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheValue, ExecutionResult, ExpirationPolicy, PartitionService, RegionName};
use crate::error::{CacheError, Result};
use crate::partition::PartitionDescriptor;

pub use local::LocalCluster;
pub use topology::{PartitionTransport, Topology};

// == Hashing ==
/// Stable 64-bit route hash: the first eight bytes of SHA-256, big-endian.
pub fn route_hash(input: &str) -> i64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head)
}

/// The string hashed to place `(region, key)`.
pub fn partition_key(region: &RegionName, key: &str) -> String {
    if region.is_default() {
        key.to_string()
    } else {
        format!("{}_{}", region, key)
    }
}

// == Partition Router ==
pub struct PartitionRouter {
    service_name: String,
    topology: Arc<dyn Topology>,
    transport: Arc<dyn PartitionTransport>,
    partitions: RwLock<Vec<PartitionDescriptor>>,
}

impl PartitionRouter {
    /// Builds a router and loads the initial partition map.
    pub async fn connect(
        service_name: impl Into<String>,
        topology: Arc<dyn Topology>,
        transport: Arc<dyn PartitionTransport>,
    ) -> Result<Self> {
        let router = Self {
            service_name: service_name.into(),
            topology,
            transport,
            partitions: RwLock::new(Vec::new()),
        };
        router.refresh().await?;
        Ok(router)
    }

    /// Reloads the partition map from the topology.
    pub async fn refresh(&self) -> Result<()> {
        let mut partitions = self.topology.list_partitions(&self.service_name).await?;
        partitions.sort_by_key(|p| p.low_key);
        info!(
            service = %self.service_name,
            partitions = partitions.len(),
            "Partition map loaded"
        );
        *self.partitions.write().await = partitions;
        Ok(())
    }

    pub async fn partitions(&self) -> Vec<PartitionDescriptor> {
        self.partitions.read().await.clone()
    }

    // == Resolution ==
    async fn owner_of(&self, hash: i64) -> Option<PartitionDescriptor> {
        let partitions = self.partitions.read().await;
        partitions.iter().find(|p| p.contains(hash)).copied()
    }

    async fn resolve_hash(&self, hash: i64) -> Result<PartitionDescriptor> {
        if let Some(owner) = self.owner_of(hash).await {
            return Ok(owner);
        }

        warn!(service = %self.service_name, hash, "No partition owns hash, refreshing topology");
        self.refresh().await?;
        self.owner_of(hash).await.ok_or_else(|| {
            CacheError::RoutingFailure(format!("No partition owns hash {}", hash))
        })
    }

    /// The partition owning `(region, key)`.
    pub async fn resolve(&self, region: &RegionName, key: &str) -> Result<PartitionDescriptor> {
        self.resolve_hash(route_hash(&partition_key(region, key))).await
    }

    /// The partition selected by hashing the region name alone. Entries of
    /// the region are placed by `(region, key)` and generally live elsewhere.
    pub async fn resolve_by_region_only(&self, region: &RegionName) -> Result<PartitionDescriptor> {
        self.resolve_hash(route_hash(region.as_str())).await
    }

    pub async fn resolve_all(&self) -> Result<Vec<PartitionDescriptor>> {
        self.refresh().await?;
        Ok(self.partitions().await)
    }

    async fn service_for(
        &self,
        region: &RegionName,
        key: &str,
    ) -> Result<Arc<dyn PartitionService>> {
        let partition = self.resolve(region, key).await?;
        debug!(region = %region, key, partition = %partition.id, "Routed");
        self.transport.connect(&partition)
    }

    // == Keyed Operations ==
    pub async fn try_get(&self, region: Option<&str>, key: &str) -> Result<Option<CacheValue>> {
        let region = RegionName::parse(region)?;
        self.service_for(&region, key)
            .await?
            .try_get(&region, key)
            .await
    }

    /// Returns the cached value, or stores and returns the one produced by
    /// `factory` on a miss.
    pub async fn get_or_add<F>(&self, region: Option<&str>, key: &str, factory: F) -> Result<CacheValue>
    where
        F: FnOnce() -> (CacheValue, ExpirationPolicy) + Send,
    {
        let region = RegionName::parse(region)?;
        let service = self.service_for(&region, key).await?;
        if let Some(value) = service.try_get(&region, key).await? {
            return Ok(value);
        }

        let (value, policy) = factory();
        service
            .set_or_update(&region, key, value.clone(), policy)
            .await?;
        Ok(value)
    }

    pub async fn set_or_update(
        &self,
        region: Option<&str>,
        key: &str,
        value: CacheValue,
        policy: ExpirationPolicy,
    ) -> Result<()> {
        let region = RegionName::parse(region)?;
        self.service_for(&region, key)
            .await?
            .set_or_update(&region, key, value, policy)
            .await
    }

    pub async fn try_update_policy(
        &self,
        region: Option<&str>,
        key: &str,
        policy: ExpirationPolicy,
    ) -> Result<ExecutionResult> {
        let region = RegionName::parse(region)?;
        self.service_for(&region, key)
            .await?
            .try_update_policy(&region, key, policy)
            .await
    }

    pub async fn try_delete(&self, region: Option<&str>, key: &str) -> Result<ExecutionResult> {
        let region = RegionName::parse(region)?;
        self.service_for(&region, key)
            .await?
            .try_delete(&region, key)
            .await
    }

    // == Typed Helpers ==
    pub async fn try_get_as<T>(&self, region: Option<&str>, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.try_get(region, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_or_update_as<T>(
        &self,
        region: Option<&str>,
        key: &str,
        value: &T,
        policy: ExpirationPolicy,
    ) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set_or_update(region, key, bytes, policy).await
    }

    pub async fn get_or_add_as<T, F>(&self, region: Option<&str>, key: &str, factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> (T, ExpirationPolicy) + Send,
    {
        if let Some(value) = self.try_get_as(region, key).await? {
            return Ok(value);
        }

        let (value, policy) = factory();
        self.set_or_update_as(region, key, &value, policy).await?;
        Ok(value)
    }

    // == Bulk Operations ==
    /// Cleans the region on the single partition its name hashes to.
    pub async fn clean_region(&self, region: &str) -> Result<()> {
        let name = RegionName::explicit(region)?;
        let partition = self.resolve_by_region_only(&name).await?;
        debug!(region = %name, partition = %partition.id, "Routed region clean");
        self.transport.connect(&partition)?.clean_region(region).await
    }

    /// Cleans the region on every partition.
    pub async fn clean_region_everywhere(&self, region: &str) -> Result<()> {
        RegionName::explicit(region)?;
        let region = region.to_string();
        self.fan_out(move |service| {
            let region = region.clone();
            async move { service.clean_region(&region).await }
        })
        .await
    }

    /// Cleans every partition, failing if any partition fails.
    pub async fn clean_all(&self) -> Result<()> {
        self.fan_out(|service| async move { service.clean_all().await })
            .await
    }

    async fn fan_out<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: Fn(Arc<dyn PartitionService>) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for partition in self.resolve_all().await? {
            let service = self.transport.connect(&partition)?;
            let call = operation(service);
            tasks.spawn(async move { (partition.id, call.await) });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((id, Err(err))) => Some((id.to_string(), err)),
                Ok((_, Ok(()))) => None,
                Err(err) => Some(("task".to_string(), CacheError::Internal(err.to_string()))),
            };
            if let Some((partition, err)) = outcome {
                warn!(partition = %partition, error = %err, "Partition operation failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::partition::PartitionId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    async fn local_router(count: usize) -> (PartitionRouter, Arc<LocalCluster>) {
        let cluster = Arc::new(
            LocalCluster::start("svc", count, EngineConfig::default())
                .await
                .unwrap(),
        );
        let router = PartitionRouter::connect("svc", cluster.clone(), cluster.clone())
            .await
            .unwrap();
        (router, cluster)
    }

    fn ttl() -> ExpirationPolicy {
        ExpirationPolicy::after(Duration::from_secs(300))
    }

    /// Topology whose partition map can be swapped between calls.
    struct SwappableTopology {
        partitions: Mutex<Vec<PartitionDescriptor>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Topology for SwappableTopology {
        async fn list_partitions(&self, _service: &str) -> Result<Vec<PartitionDescriptor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.partitions.lock().unwrap().clone())
        }
    }

    struct NoTransport;

    impl PartitionTransport for NoTransport {
        fn connect(&self, partition: &PartitionDescriptor) -> Result<Arc<dyn PartitionService>> {
            Err(CacheError::RoutingFailure(format!("{} unreachable", partition.id)))
        }
    }

    #[test]
    fn test_route_hash_is_stable() {
        assert_eq!(route_hash("abc"), route_hash("abc"));
        assert_ne!(route_hash("abc"), route_hash("abd"));
    }

    #[test]
    fn test_partition_key_shapes() {
        let default = RegionName::default_region();
        assert_eq!(partition_key(&default, "k"), "k");

        let lower = RegionName::parse(Some("orders")).unwrap();
        let upper = RegionName::parse(Some("ORDERS")).unwrap();
        assert_eq!(partition_key(&lower, "k"), "ORDERS_k");
        assert_eq!(partition_key(&lower, "k"), partition_key(&upper, "k"));
    }

    #[tokio::test]
    async fn test_resolve_is_deterministic() {
        let (router, cluster) = local_router(4).await;
        let region = RegionName::parse(Some("r")).unwrap();

        for i in 0..50 {
            let key = format!("key-{}", i);
            let first = router.resolve(&region, &key).await.unwrap();
            let second = router.resolve(&region, &key).await.unwrap();
            assert_eq!(first, second);
            assert!(first.contains(route_hash(&partition_key(&region, &key))));
        }
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_routed_writes_land_on_owner() {
        let (router, cluster) = local_router(4).await;
        router.set_or_update(Some("r"), "k", b"v".to_vec(), ttl()).await.unwrap();

        let region = RegionName::parse(Some("r")).unwrap();
        let owner = router.resolve(&region, "k").await.unwrap();
        for id in 0..4 {
            let engine = cluster.engine(PartitionId(id)).unwrap();
            let found = engine.try_get(&region, "k").await.unwrap();
            assert_eq!(found.is_some(), PartitionId(id) == owner.id);
        }
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_or_add_invokes_factory_once() {
        let (router, cluster) = local_router(2).await;
        let calls = AtomicUsize::new(0);

        let first = router
            .get_or_add(Some("r"), "k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                (b"made".to_vec(), ttl())
            })
            .await
            .unwrap();
        let second = router
            .get_or_add(Some("r"), "k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                (b"other".to_vec(), ttl())
            })
            .await
            .unwrap();

        assert_eq!(first, b"made".to_vec());
        assert_eq!(second, b"made".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let (router, cluster) = local_router(2).await;
        let scores = vec![3u32, 1, 4];
        router
            .set_or_update_as(None, "scores", &scores, ttl())
            .await
            .unwrap();
        let read: Option<Vec<u32>> = router.try_get_as(None, "scores").await.unwrap();
        assert_eq!(read, Some(scores));

        let made: String = router
            .get_or_add_as(Some("names"), "n", || ("ada".to_string(), ttl()))
            .await
            .unwrap();
        assert_eq!(made, "ada");

        router
            .set_or_update(None, "raw", b"not json".to_vec(), ttl())
            .await
            .unwrap();
        let bad: Result<Option<Vec<u32>>> = router.try_get_as(None, "raw").await;
        assert!(matches!(bad, Err(CacheError::Serialization(_))));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_region_routes_by_region_only() {
        let (router, cluster) = local_router(4).await;
        let region = RegionName::parse(Some("r")).unwrap();
        let target = router.resolve_by_region_only(&region).await.unwrap();

        router.set_or_update(Some("r"), "k", b"v".to_vec(), ttl()).await.unwrap();
        let owner = router.resolve(&region, "k").await.unwrap();

        router.clean_region("r").await.unwrap();
        let survived = router.try_get(Some("r"), "k").await.unwrap().is_some();
        assert_eq!(survived, owner.id != target.id);

        router.clean_region_everywhere("r").await.unwrap();
        assert_eq!(router.try_get(Some("r"), "k").await.unwrap(), None);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_region_rejects_blank() {
        let (router, cluster) = local_router(2).await;
        assert!(matches!(
            router.clean_region(" ").await,
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            router.clean_region_everywhere("").await,
            Err(CacheError::InvalidArgument(_))
        ));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_all_reaches_every_partition() {
        let (router, cluster) = local_router(4).await;
        for i in 0..20 {
            router
                .set_or_update(Some("r"), &format!("k{}", i), b"v".to_vec(), ttl())
                .await
                .unwrap();
        }

        router.clean_all().await.unwrap();
        for i in 0..20 {
            assert_eq!(router.try_get(Some("r"), &format!("k{}", i)).await.unwrap(), None);
        }
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_all_fails_if_any_partition_fails() {
        let (router, cluster) = local_router(3).await;
        cluster.store(PartitionId(1)).unwrap().set_available(false);

        assert!(matches!(
            router.clean_all().await,
            Err(CacheError::StoreUnavailable(_))
        ));
        cluster.store(PartitionId(1)).unwrap().set_available(true);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_topology_refreshes_then_fails() {
        let half = PartitionDescriptor::new(PartitionId(0), i64::MIN, -1).unwrap();
        let topology = Arc::new(SwappableTopology {
            partitions: Mutex::new(vec![half]),
            calls: AtomicUsize::new(0),
        });
        let router = PartitionRouter::connect("svc", topology.clone(), Arc::new(NoTransport))
            .await
            .unwrap();

        let key = (0..)
            .map(|i| format!("k{}", i))
            .find(|k| route_hash(k) >= 0)
            .unwrap();
        let default = RegionName::default_region();
        assert!(matches!(
            router.resolve(&default, &key).await,
            Err(CacheError::RoutingFailure(_))
        ));
        assert_eq!(topology.calls.load(Ordering::SeqCst), 2);

        *topology.partitions.lock().unwrap() = PartitionDescriptor::uniform(1).unwrap();
        let owner = router.resolve(&default, &key).await.unwrap();
        assert_eq!(owner.id, PartitionId(0));
        assert_eq!(topology.calls.load(Ordering::SeqCst), 3);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            // Every route string lands in exactly one partition of a uniform split.
            #[test]
            fn prop_every_hash_has_one_owner(input in ".{0,64}", count in 1u32..16) {
                let partitions = PartitionDescriptor::uniform(count).unwrap();
                let hash = route_hash(&input);
                let owners = partitions.iter().filter(|p| p.contains(hash)).count();
                prop_assert_eq!(owners, 1);
            }

            // Region letter case never changes where a key is placed.
            #[test]
            fn prop_route_ignores_region_case(region in "[a-zA-Z]{1,12}", key in "[a-z0-9]{1,12}") {
                let lower = RegionName::parse(Some(&region.to_lowercase())).unwrap();
                let upper = RegionName::parse(Some(&region.to_uppercase())).unwrap();
                prop_assert_eq!(
                    route_hash(&partition_key(&lower, &key)),
                    route_hash(&partition_key(&upper, &key))
                );
            }
        }
    }
}
