//! Cache Engine
//!
//! The per-partition cache. Every operation runs as one store transaction,
//! re-run on optimistic conflicts. Writes keep the region registry and the
//! region's expiration scheduler in step with the persisted data.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::registry::RegionRegistry;
use super::scheduler::{EvictionTarget, RegionScheduler};
use super::service::PartitionService;
use super::signal::Signal;
use super::stats::{CacheStats, StatsSnapshot};
use super::{CacheValue, ExecutionResult, ExpirationPolicy, RegionName, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::config::EngineConfig;
use crate::error::{CacheError, Result};
use crate::partition::PartitionId;
use crate::store::{retry_on_conflict, RegionMaps, TransactionalStore, REGISTRY_MAP};

// == Shared State ==
/// State shared by an engine and the schedulers it spawned.
pub(crate) struct EngineShared {
    pub partition: PartitionId,
    pub store: Arc<dyn TransactionalStore>,
    pub registry: RegionRegistry,
    pub shutdown: Signal,
    pub config: EngineConfig,
    pub stats: CacheStats,
}

/// Persisted registry record for a region. Scheduling hints stay in memory;
/// recovery rescans the policies instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegionRecord {
    created_at: DateTime<Utc>,
}

/// Fires the shutdown signal once the last engine handle is dropped.
#[derive(Debug)]
struct ShutdownOnDrop(Signal);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.0.fire();
    }
}

// == Cache Engine ==
/// Handle to one partition's cache. Clones share the same partition.
#[derive(Clone)]
pub struct CacheEngine {
    shared: Arc<EngineShared>,
    _lifetime: Arc<ShutdownOnDrop>,
}

impl CacheEngine {
    /// Opens a partition over `store`, restarting a scheduler for every
    /// region recorded in the persisted registry.
    pub async fn open(
        partition: PartitionId,
        store: Arc<dyn TransactionalStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let shutdown = Signal::new();
        let engine = Self {
            shared: Arc::new(EngineShared {
                partition,
                store,
                registry: RegionRegistry::new(),
                shutdown: shutdown.clone(),
                config,
                stats: CacheStats::new(partition.to_string()),
            }),
            _lifetime: Arc::new(ShutdownOnDrop(shutdown)),
        };

        let regions = engine.persisted_regions().await?;
        for region in &regions {
            engine.ensure_scheduler(region);
        }

        info!(
            partition = %partition,
            regions = regions.len(),
            "Cache engine opened"
        );
        Ok(engine)
    }

    // == Set ==
    /// Stores `value` under `(region, key)` with `policy`, replacing any
    /// existing value and policy.
    pub async fn try_set(
        &self,
        region: &RegionName,
        key: &str,
        value: CacheValue,
        policy: ExpirationPolicy,
    ) -> Result<()> {
        validate_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidArgument(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }

        let maps = RegionMaps::for_region(region);
        let encoded = policy.encode()?;
        let value = value.as_slice();
        let encoded = encoded.as_slice();
        retry_on_conflict(|| self.set_once(region, &maps, key, value, encoded)).await?;

        self.shared.stats.record_set();
        self.note_write(region, policy.absolute_expiration);
        debug!(region = %region, key, expires = %policy.absolute_expiration, "Entry set");
        Ok(())
    }

    async fn set_once(
        &self,
        region: &RegionName,
        maps: &RegionMaps,
        key: &str,
        value: &[u8],
        policy: &[u8],
    ) -> Result<()> {
        let mut txn = self.shared.store.begin().await?;
        txn.put(&maps.entries, key, value.to_vec()).await?;
        txn.put(&maps.policies, key, policy.to_vec()).await?;
        if txn.get(REGISTRY_MAP, region.as_str()).await?.is_none() {
            let record = RegionRecord {
                created_at: Utc::now(),
            };
            txn.put(REGISTRY_MAP, region.as_str(), serde_json::to_vec(&record)?)
                .await?;
        }
        txn.commit().await
    }

    // == Get ==
    /// Reads the value of `(region, key)`. The policy is not touched.
    pub async fn try_get(&self, region: &RegionName, key: &str) -> Result<Option<CacheValue>> {
        validate_key(key)?;
        let maps = RegionMaps::for_region(region);

        let mut txn = self.shared.store.begin().await?;
        let value = txn.get(&maps.entries, key).await;
        txn.discard().await;
        let value = value?;

        match value {
            Some(_) => self.shared.stats.record_hit(),
            None => self.shared.stats.record_miss(),
        }
        Ok(value)
    }

    // == Update Policy ==
    /// Replaces the expiration policy of an existing entry.
    pub async fn try_update_policy(
        &self,
        region: &RegionName,
        key: &str,
        policy: ExpirationPolicy,
    ) -> Result<ExecutionResult> {
        validate_key(key)?;
        let maps = RegionMaps::for_region(region);
        let encoded = policy.encode()?;
        let encoded = encoded.as_slice();

        let result = retry_on_conflict(|| self.update_policy_once(&maps, key, encoded)).await?;
        if result.is_done() {
            self.note_write(region, policy.absolute_expiration);
        }
        Ok(result)
    }

    async fn update_policy_once(
        &self,
        maps: &RegionMaps,
        key: &str,
        policy: &[u8],
    ) -> Result<ExecutionResult> {
        let mut txn = self.shared.store.begin().await?;
        let has_value = txn.get(&maps.entries, key).await?.is_some();

        if has_value {
            txn.put(&maps.policies, key, policy.to_vec()).await?;
            txn.commit().await?;
            return Ok(ExecutionResult::Done);
        }

        // A policy without a value is an orphan left by an interrupted writer.
        if txn.remove(&maps.policies, key).await? {
            warn!(map = %maps.policies, key, "Removing orphaned policy");
            txn.commit().await?;
        } else {
            txn.discard().await;
        }
        Ok(ExecutionResult::NotFound)
    }

    // == Delete ==
    /// Removes the value and policy of `(region, key)`.
    pub async fn try_delete(&self, region: &RegionName, key: &str) -> Result<ExecutionResult> {
        validate_key(key)?;
        let maps = RegionMaps::for_region(region);

        let result = retry_on_conflict(|| self.delete_once(&maps, key)).await?;
        if result.is_done() {
            self.shared.stats.record_delete();
        }
        Ok(result)
    }

    async fn delete_once(&self, maps: &RegionMaps, key: &str) -> Result<ExecutionResult> {
        let mut txn = self.shared.store.begin().await?;
        let removed_value = txn.remove(&maps.entries, key).await?;
        let removed_policy = txn.remove(&maps.policies, key).await?;

        if removed_value || removed_policy {
            txn.commit().await?;
            Ok(ExecutionResult::Done)
        } else {
            txn.discard().await;
            Ok(ExecutionResult::NotFound)
        }
    }

    // == Clean Region ==
    /// Drops a whole region: its data, its registry record and its scheduler.
    pub async fn clean_region(&self, region: &str) -> Result<()> {
        let region = RegionName::explicit(region)?;
        let was_tracked = self.shared.registry.retire(&region);
        let maps = RegionMaps::for_region(&region);
        let target = &region;

        match retry_on_conflict(|| self.drop_region_once(target, &maps)).await {
            Ok(()) => {
                self.shared.stats.record_regions_cleaned(1);
                // A write racing the clean may have restarted a scheduler
                // whose data the commit just dropped.
                self.release_if_abandoned(&region).await;
                info!(partition = %self.shared.partition, region = %region, "Region cleaned");
                Ok(())
            }
            Err(err) => {
                if was_tracked {
                    self.ensure_scheduler(&region);
                }
                Err(err)
            }
        }
    }

    async fn drop_region_once(&self, region: &RegionName, maps: &RegionMaps) -> Result<()> {
        let mut txn = self.shared.store.begin().await?;
        txn.clear(&maps.entries).await?;
        txn.clear(&maps.policies).await?;
        txn.remove(REGISTRY_MAP, region.as_str()).await?;
        txn.commit().await
    }

    // == Clean All ==
    /// Drops every region on this partition.
    pub async fn clean_all(&self) -> Result<()> {
        let retired = self.shared.registry.retire_all();
        let known = retired.as_slice();

        match retry_on_conflict(|| self.drop_all_once(known)).await {
            Ok(count) => {
                self.shared.stats.record_regions_cleaned(count as u64);
                for region in self.shared.registry.regions() {
                    self.release_if_abandoned(&region).await;
                }
                info!(partition = %self.shared.partition, regions = count, "All regions cleaned");
                Ok(())
            }
            Err(err) => {
                for region in &retired {
                    self.ensure_scheduler(region);
                }
                Err(err)
            }
        }
    }

    async fn drop_all_once(&self, known: &[RegionName]) -> Result<usize> {
        let mut txn = self.shared.store.begin().await?;
        let mut regions: BTreeSet<RegionName> = known.iter().cloned().collect();
        for (name, _) in txn.iterate(REGISTRY_MAP).await? {
            regions.insert(RegionName::from_persisted(name));
        }

        for region in &regions {
            let maps = RegionMaps::for_region(region);
            txn.clear(&maps.entries).await?;
            txn.clear(&maps.policies).await?;
            txn.remove(REGISTRY_MAP, region.as_str()).await?;
        }
        txn.commit().await?;
        Ok(regions.len())
    }

    // == Lifecycle ==
    /// Stops every scheduler and waits for them to exit.
    pub async fn shutdown(&self) {
        self.shared.shutdown.fire();
        for task in self.shared.registry.take_tasks() {
            if let Err(err) = task.await {
                warn!(partition = %self.shared.partition, error = %err, "Scheduler task failed");
            }
        }
        info!(partition = %self.shared.partition, "Cache engine stopped");
    }

    // == Introspection ==
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Regions with a live scheduler, sorted.
    pub fn regions(&self) -> Vec<RegionName> {
        self.shared.registry.regions()
    }

    /// The scheduler's current lowest-expiration hint for a region.
    pub fn lowest_expiration(&self, region: &RegionName) -> Option<DateTime<Utc>> {
        self.shared.registry.lowest_expiration(region)
    }

    fn ensure_scheduler(&self, region: &RegionName) {
        let shared = Arc::clone(&self.shared);
        let started = self
            .shared
            .registry
            .track(region, move |ticket| RegionScheduler::new(shared, ticket).spawn());
        if started {
            debug!(
                partition = %self.shared.partition,
                region = %region,
                "Region scheduler restarted"
            );
        }
    }

    /// Hands a committed expiration to the region's scheduler, starting one
    /// for a new region.
    fn note_write(&self, region: &RegionName, expiration: DateTime<Utc>) {
        let shared = Arc::clone(&self.shared);
        let created = self.shared.registry.record_write(region, expiration, move |ticket| {
            RegionScheduler::new(shared, ticket).spawn()
        });
        if created {
            debug!(
                partition = %self.shared.partition,
                region = %region,
                "Region scheduler started"
            );
        }
    }

    /// Retires the region's slot if the region has neither policies nor a
    /// registry record and no write reached it during the check.
    async fn release_if_abandoned(&self, region: &RegionName) {
        let Some((generation, wake)) = self.shared.registry.watch(region) else {
            return;
        };
        let maps = RegionMaps::for_region(region);
        match region_abandoned(self.shared.store.as_ref(), region, &maps).await {
            Ok(true) => {
                if self.shared.registry.retire_if_idle(region, generation, &wake) {
                    debug!(region = %region, "Released scheduler of cleaned region");
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!(region = %region, error = %err, "Could not check cleaned region");
            }
        }
    }

    async fn persisted_regions(&self) -> Result<Vec<RegionName>> {
        let mut txn = self.shared.store.begin().await?;
        let records = txn.iterate(REGISTRY_MAP).await;
        txn.discard().await;

        Ok(records?
            .into_iter()
            .map(|(name, _)| RegionName::from_persisted(name))
            .collect())
    }
}

#[async_trait]
impl PartitionService for CacheEngine {
    async fn try_get(&self, region: &RegionName, key: &str) -> Result<Option<CacheValue>> {
        CacheEngine::try_get(self, region, key).await
    }

    async fn set_or_update(
        &self,
        region: &RegionName,
        key: &str,
        value: CacheValue,
        policy: ExpirationPolicy,
    ) -> Result<()> {
        self.try_set(region, key, value, policy).await
    }

    async fn try_update_policy(
        &self,
        region: &RegionName,
        key: &str,
        policy: ExpirationPolicy,
    ) -> Result<ExecutionResult> {
        CacheEngine::try_update_policy(self, region, key, policy).await
    }

    async fn try_delete(&self, region: &RegionName, key: &str) -> Result<ExecutionResult> {
        CacheEngine::try_delete(self, region, key).await
    }

    async fn clean_region(&self, region: &str) -> Result<()> {
        CacheEngine::clean_region(self, region).await
    }

    async fn clean_all(&self) -> Result<()> {
        CacheEngine::clean_all(self).await
    }
}

/// True when `region` has no policies and no registry record.
pub(crate) async fn region_abandoned(
    store: &dyn TransactionalStore,
    region: &RegionName,
    maps: &RegionMaps,
) -> Result<bool> {
    let mut txn = store.begin().await?;
    let record = txn.get(REGISTRY_MAP, region.as_str()).await;
    let policies = txn.iterate(&maps.policies).await;
    txn.discard().await;
    Ok(record?.is_none() && policies?.is_empty())
}

// == Eviction ==
/// Deletes an entry only if its policy still carries the expiration the
/// scheduler scanned and that expiration has passed. Returns true when
/// something was evicted.
pub(crate) async fn remove_if_unchanged(
    shared: &EngineShared,
    maps: &RegionMaps,
    target: &EvictionTarget,
) -> Result<bool> {
    retry_on_conflict(|| evict_once(shared, maps, target)).await
}

async fn evict_once(
    shared: &EngineShared,
    maps: &RegionMaps,
    target: &EvictionTarget,
) -> Result<bool> {
    let mut txn = shared.store.begin().await?;
    let current = match txn.get(&maps.policies, &target.key).await? {
        Some(bytes) => ExpirationPolicy::decode(&bytes).ok(),
        None => None,
    };

    let due = current.is_some_and(|policy| {
        policy.absolute_expiration == target.expiration && policy.is_expired()
    });
    if !due {
        txn.discard().await;
        return Ok(false);
    }

    txn.remove(&maps.entries, &target.key).await?;
    txn.remove(&maps.policies, &target.key).await?;
    txn.commit().await?;
    Ok(true)
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidArgument(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
