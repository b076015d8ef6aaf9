//! Topology and Transport Seams
//!
//! The router learns the partition map from a `Topology` and reaches a
//! partition's engine through a `PartitionTransport`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::PartitionService;
use crate::error::Result;
use crate::partition::PartitionDescriptor;

/// Source of the current partition map for a named service.
#[async_trait]
pub trait Topology: Send + Sync {
    async fn list_partitions(&self, service_name: &str) -> Result<Vec<PartitionDescriptor>>;
}

/// Resolves a partition descriptor to a callable service endpoint.
pub trait PartitionTransport: Send + Sync {
    fn connect(&self, partition: &PartitionDescriptor) -> Result<Arc<dyn PartitionService>>;
}
