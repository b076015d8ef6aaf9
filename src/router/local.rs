//! Local Cluster
//!
//! Hosts every partition in-process, each engine over its own store. It is
//! both the topology and the transport for a router running in the same
//! process.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::topology::{PartitionTransport, Topology};
use crate::cache::{CacheEngine, PartitionService, StatsSnapshot};
use crate::config::EngineConfig;
use crate::error::{CacheError, Result};
use crate::partition::{PartitionDescriptor, PartitionId};
use crate::store::MemoryStore;

struct Member {
    descriptor: PartitionDescriptor,
    engine: Arc<CacheEngine>,
    store: MemoryStore,
}

pub struct LocalCluster {
    service_name: String,
    members: BTreeMap<PartitionId, Member>,
}

impl LocalCluster {
    /// Opens `partition_count` engines splitting the hash space evenly.
    pub async fn start(
        service_name: impl Into<String>,
        partition_count: usize,
        config: EngineConfig,
    ) -> Result<Self> {
        let count = u32::try_from(partition_count).map_err(|_| {
            CacheError::InvalidArgument(format!("Too many partitions: {}", partition_count))
        })?;

        let mut members = BTreeMap::new();
        for descriptor in PartitionDescriptor::uniform(count)? {
            let store = MemoryStore::new();
            let engine = CacheEngine::open(descriptor.id, Arc::new(store.clone()), config).await?;
            members.insert(
                descriptor.id,
                Member {
                    descriptor,
                    engine: Arc::new(engine),
                    store,
                },
            );
        }

        let service_name = service_name.into();
        info!(service = %service_name, partitions = count, "Local cluster started");
        Ok(Self {
            service_name,
            members,
        })
    }

    pub fn partition_count(&self) -> usize {
        self.members.len()
    }

    pub fn engine(&self, id: PartitionId) -> Option<&CacheEngine> {
        self.members.get(&id).map(|member| member.engine.as_ref())
    }

    pub fn store(&self, id: PartitionId) -> Option<&MemoryStore> {
        self.members.get(&id).map(|member| &member.store)
    }

    pub fn descriptors(&self) -> Vec<PartitionDescriptor> {
        self.members.values().map(|member| member.descriptor).collect()
    }

    /// Counters summed over every partition.
    pub fn stats(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for member in self.members.values() {
            total.merge(&member.engine.stats());
        }
        total
    }

    pub async fn shutdown(&self) {
        for member in self.members.values() {
            member.engine.shutdown().await;
        }
        info!(service = %self.service_name, "Local cluster stopped");
    }
}

#[async_trait]
impl Topology for LocalCluster {
    async fn list_partitions(&self, service_name: &str) -> Result<Vec<PartitionDescriptor>> {
        if service_name != self.service_name {
            return Err(CacheError::RoutingFailure(format!(
                "Unknown service '{}'",
                service_name
            )));
        }
        Ok(self.descriptors())
    }
}

impl PartitionTransport for LocalCluster {
    fn connect(&self, partition: &PartitionDescriptor) -> Result<Arc<dyn PartitionService>> {
        match self.members.get(&partition.id) {
            Some(member) => Ok(member.engine.clone() as Arc<dyn PartitionService>),
            None => Err(CacheError::RoutingFailure(format!(
                "Partition {} is not hosted here",
                partition.id
            ))),
        }
    }
}
