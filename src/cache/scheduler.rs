//! Expiration Scheduler
//!
//! One long-lived task per region per partition. Each cycle it finds the
//! soonest-expiring entry, sleeps until that entry is due, evicts it and
//! starts over. A write that introduces an earlier expiration fires the
//! region's wake signal, which cuts the sleep short and forces a rescan.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//!   Scanning --(empty / scan error)--> Sleeping { target: None }
//!   Scanning --(empty, unrecorded)---> Cancelled
//!   Scanning --(entry due later)-----> Sleeping { target: Some }
//!   Scanning --(entry already due)---> Evicting
//!   Sleeping --(preempted)-----------> Scanning
//!   Sleeping --(elapsed, target)-----> Evicting --> Scanning
//!   Sleeping --(elapsed, no target)--> Scanning
//!   any      --(shutdown / retired)--> Cancelled
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{region_abandoned, remove_if_unchanged, EngineShared};
use super::registry::SlotTicket;
use super::signal::Signal;
use super::ExpirationPolicy;
use crate::error::Result;
use crate::store::{RegionMaps, TransactionalStore};

// == Scheduler State ==
/// The soonest-expiring entry found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EvictionTarget {
    pub key: String,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug)]
enum SchedulerState {
    Scanning,
    Sleeping {
        wake: Signal,
        delay: Duration,
        target: Option<EvictionTarget>,
    },
    Evicting(EvictionTarget),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeReason {
    Elapsed,
    Preempted,
    Stopped,
}

// == Region Scheduler ==
pub(crate) struct RegionScheduler {
    shared: Arc<EngineShared>,
    ticket: SlotTicket,
    maps: RegionMaps,
}

impl RegionScheduler {
    pub(crate) fn new(shared: Arc<EngineShared>, ticket: SlotTicket) -> Self {
        let maps = RegionMaps::for_region(&ticket.region);
        Self {
            shared,
            ticket,
            maps,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            partition = %self.shared.partition,
            region = %self.ticket.region,
            "Expiration scheduler started"
        );

        let mut state = SchedulerState::Scanning;
        loop {
            if self.is_stopped() {
                state = SchedulerState::Cancelled;
            }
            if matches!(state, SchedulerState::Cancelled) {
                break;
            }
            state = self.step(state).await;
        }

        info!(
            partition = %self.shared.partition,
            region = %self.ticket.region,
            "Expiration scheduler stopped"
        );
    }

    fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_fired() || self.ticket.retired.is_fired()
    }

    async fn step(&self, state: SchedulerState) -> SchedulerState {
        match state {
            SchedulerState::Scanning => self.scan().await,
            SchedulerState::Sleeping {
                wake,
                delay,
                target,
            } => match self.sleep(delay, &wake).await {
                WakeReason::Stopped => SchedulerState::Cancelled,
                WakeReason::Preempted => SchedulerState::Scanning,
                WakeReason::Elapsed => match target {
                    Some(target) => SchedulerState::Evicting(target),
                    None => SchedulerState::Scanning,
                },
            },
            SchedulerState::Evicting(target) => self.evict(target).await,
            SchedulerState::Cancelled => SchedulerState::Cancelled,
        }
    }

    // == Scanning ==
    async fn scan(&self) -> SchedulerState {
        let registry = &self.shared.registry;
        let region = &self.ticket.region;

        // Clears the hint so a write committed mid-scan always preempts.
        let Some(wake) = registry.begin_scan(region, self.ticket.generation) else {
            return SchedulerState::Cancelled;
        };

        match find_soonest(self.shared.store.as_ref(), &self.maps).await {
            Err(err) => {
                warn!(
                    partition = %self.shared.partition,
                    region = %region,
                    error = %err,
                    "Expiration scan failed, retrying"
                );
                self.shared.stats.record_scan_failure();
                SchedulerState::Sleeping {
                    wake,
                    delay: self.shared.config.scan_retry,
                    target: None,
                }
            }
            Ok(None) => {
                registry.record_scan(region, self.ticket.generation, None);
                if self.release_if_dropped(&wake).await {
                    return SchedulerState::Cancelled;
                }
                debug!(region = %region, "Region empty, idling");
                SchedulerState::Sleeping {
                    wake,
                    delay: self.shared.config.idle_rescan,
                    target: None,
                }
            }
            Ok(Some(target)) => {
                registry.record_scan(region, self.ticket.generation, Some(target.expiration));
                let delay = ExpirationPolicy::at(target.expiration).remaining();
                debug!(region = %region, key = %target.key, ?delay, "Next expiration found");
                if delay.is_zero() {
                    SchedulerState::Evicting(target)
                } else {
                    SchedulerState::Sleeping {
                        wake,
                        delay,
                        target: Some(target),
                    }
                }
            }
        }
    }

    /// An empty region whose registry record is gone was cleaned while this
    /// scheduler was being started. Retires the slot unless a write arrived
    /// since `wake` was handed out.
    async fn release_if_dropped(&self, wake: &Signal) -> bool {
        let region = &self.ticket.region;
        match region_abandoned(self.shared.store.as_ref(), region, &self.maps).await {
            Ok(true) => {
                let registry = &self.shared.registry;
                let released = registry.retire_if_idle(region, self.ticket.generation, wake);
                if released {
                    debug!(region = %region, "Region dropped, releasing scheduler");
                }
                released
            }
            Ok(false) => false,
            Err(err) => {
                debug!(region = %region, error = %err, "Region record check failed");
                false
            }
        }
    }

    // == Sleeping ==
    async fn sleep(&self, delay: Duration, wake: &Signal) -> WakeReason {
        tokio::select! {
            biased;
            _ = self.shared.shutdown.fired() => WakeReason::Stopped,
            _ = self.ticket.retired.fired() => WakeReason::Stopped,
            _ = wake.fired() => WakeReason::Preempted,
            _ = tokio::time::sleep(delay) => WakeReason::Elapsed,
        }
    }

    // == Evicting ==
    async fn evict(&self, target: EvictionTarget) -> SchedulerState {
        let region = &self.ticket.region;
        match remove_if_unchanged(&self.shared, &self.maps, &target).await {
            Ok(true) => {
                self.shared.stats.record_eviction();
                debug!(region = %region, key = %target.key, "Evicted expired entry");
                SchedulerState::Scanning
            }
            Ok(false) => {
                debug!(region = %region, key = %target.key, "Entry changed before eviction");
                SchedulerState::Scanning
            }
            Err(err) => {
                warn!(
                    partition = %self.shared.partition,
                    region = %region,
                    key = %target.key,
                    error = %err,
                    "Eviction failed, retrying"
                );
                self.shared.stats.record_scan_failure();
                let backoff = Signal::new();
                match self.sleep(self.shared.config.scan_retry, &backoff).await {
                    WakeReason::Stopped => SchedulerState::Cancelled,
                    _ => SchedulerState::Scanning,
                }
            }
        }
    }
}

// == Find Soonest ==
/// Linear scan of a region's policies for the minimum expiration.
pub(crate) async fn find_soonest(
    store: &dyn TransactionalStore,
    maps: &RegionMaps,
) -> Result<Option<EvictionTarget>> {
    let mut txn = store.begin().await?;
    let policies = txn.iterate(&maps.policies).await;
    txn.discard().await;

    let mut soonest: Option<EvictionTarget> = None;
    for (key, bytes) in policies? {
        let policy = match ExpirationPolicy::decode(&bytes) {
            Ok(policy) => policy,
            Err(err) => {
                warn!(map = %maps.policies, key = %key, error = %err, "Skipping undecodable policy");
                continue;
            }
        };
        let earlier = soonest
            .as_ref()
            .map_or(true, |current| policy.absolute_expiration < current.expiration);
        if earlier {
            soonest = Some(EvictionTarget {
                key,
                expiration: policy.absolute_expiration,
            });
        }
    }
    Ok(soonest)
}
