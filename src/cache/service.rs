//! Partition Service
//!
//! The operations one partition exposes to the router. `CacheEngine`
//! implements it in-process; a networked transport would implement it with
//! a client stub.

use async_trait::async_trait;

use super::{CacheValue, ExecutionResult, ExpirationPolicy, RegionName};
use crate::error::Result;

#[async_trait]
pub trait PartitionService: Send + Sync {
    async fn try_get(&self, region: &RegionName, key: &str) -> Result<Option<CacheValue>>;

    async fn set_or_update(
        &self,
        region: &RegionName,
        key: &str,
        value: CacheValue,
        policy: ExpirationPolicy,
    ) -> Result<()>;

    async fn try_update_policy(
        &self,
        region: &RegionName,
        key: &str,
        policy: ExpirationPolicy,
    ) -> Result<ExecutionResult>;

    async fn try_delete(&self, region: &RegionName, key: &str) -> Result<ExecutionResult>;

    /// Takes the raw region so blank names are rejected by the partition.
    async fn clean_region(&self, region: &str) -> Result<()>;

    async fn clean_all(&self) -> Result<()>;
}
