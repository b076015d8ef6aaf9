//! Region Registry
//!
//! Per-partition table of live regions. Each slot holds the region's lowest
//! known expiration (a scheduling hint), the wake signal its scheduler is
//! currently sleeping on, and the handle of that scheduler task.
//!
//! All mutation happens under one mutex, so a region can never gain a
//! second scheduler and a replaced wake signal is always fired first. A scan
//! clears the hint when it starts, so writes racing the scan always wake it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::signal::Signal;
use crate::cache::RegionName;

// == Region Slot ==
#[derive(Debug)]
struct RegionSlot {
    generation: u64,
    /// `None` means no entry is known (unbounded)
    lowest_expiration: Option<DateTime<Utc>>,
    wake: Signal,
    retired: Signal,
    task: Option<JoinHandle<()>>,
}

/// What a newly started scheduler needs to know about its slot.
#[derive(Debug, Clone)]
pub struct SlotTicket {
    pub region: RegionName,
    pub generation: u64,
    pub retired: Signal,
}

#[derive(Debug, Default)]
struct Slots {
    regions: HashMap<RegionName, RegionSlot>,
    next_generation: u64,
}

// == Region Registry ==
#[derive(Debug, Default)]
pub struct RegionRegistry {
    slots: Mutex<Slots>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    lock_kind = "mutex.lock",
                    result = "poisoned_recovered",
                    "Recovered from poisoned region registry lock"
                );
                poisoned.into_inner()
            }
        }
    }

    // == Track ==
    /// Ensures `region` has a slot, starting its scheduler through `spawn`
    /// when the slot is new. Returns true if the region was created.
    ///
    /// `spawn` runs under the registry lock and must not call back into it.
    pub fn track<F>(&self, region: &RegionName, spawn: F) -> bool
    where
        F: FnOnce(SlotTicket) -> JoinHandle<()>,
    {
        let mut slots = self.lock();
        insert_slot(&mut slots, region, spawn)
    }

    // == Record Write ==
    /// Records a committed write of `expiration` to `region`, tracking the
    /// region first if it has no slot. If the expiration precedes the
    /// current hint, the hint is replaced and the scheduler's sleep is
    /// preempted with a fresh signal armed for its next cycle.
    ///
    /// Both steps happen under one lock, so a write either reaches a live
    /// slot or starts a new one. Returns true if the region was created.
    pub fn record_write<F>(
        &self,
        region: &RegionName,
        expiration: DateTime<Utc>,
        spawn: F,
    ) -> bool
    where
        F: FnOnce(SlotTicket) -> JoinHandle<()>,
    {
        let mut slots = self.lock();
        let created = insert_slot(&mut slots, region, spawn);
        if let Some(slot) = slots.regions.get_mut(region) {
            let earlier = slot
                .lowest_expiration
                .map_or(true, |current| expiration < current);
            if earlier {
                slot.lowest_expiration = Some(expiration);
                slot.wake.fire();
                slot.wake = Signal::new();
            }
        }
        created
    }

    // == Scheduler Access ==
    /// Starts a scan by the scheduler of `generation`: the hint is cleared
    /// so every write landing during the scan fires the returned signal.
    /// `None` once that scheduler's slot is gone.
    pub fn begin_scan(&self, region: &RegionName, generation: u64) -> Option<Signal> {
        let mut slots = self.lock();
        let slot = slots
            .regions
            .get_mut(region)
            .filter(|slot| slot.generation == generation)?;
        slot.lowest_expiration = None;
        Some(slot.wake.clone())
    }

    /// Like `begin_scan`, for a caller that does not own the slot. Returns
    /// the slot's generation with the signal.
    pub fn watch(&self, region: &RegionName) -> Option<(u64, Signal)> {
        let mut slots = self.lock();
        let slot = slots.regions.get_mut(region)?;
        slot.lowest_expiration = None;
        Some((slot.generation, slot.wake.clone()))
    }

    /// Stores the minimum found by a scheduler scan, keeping any earlier
    /// expiration written while the scan ran.
    pub fn record_scan(
        &self,
        region: &RegionName,
        generation: u64,
        lowest: Option<DateTime<Utc>>,
    ) {
        let mut slots = self.lock();
        if let Some(slot) = slots.regions.get_mut(region) {
            if slot.generation == generation {
                slot.lowest_expiration = match (slot.lowest_expiration, lowest) {
                    (Some(written), Some(scanned)) => Some(written.min(scanned)),
                    (written, scanned) => written.or(scanned),
                };
            }
        }
    }

    // == Retire ==
    /// Removes the region's slot and permanently cancels its scheduler.
    pub fn retire(&self, region: &RegionName) -> bool {
        let removed = self.lock().regions.remove(region);
        match removed {
            Some(slot) => {
                cancel(slot);
                true
            }
            None => false,
        }
    }

    /// Retires the slot of `generation` unless a write fired `wake` since it
    /// was handed out by `begin_scan` or `watch`.
    pub fn retire_if_idle(&self, region: &RegionName, generation: u64, wake: &Signal) -> bool {
        let mut slots = self.lock();
        let idle = slots
            .regions
            .get(region)
            .is_some_and(|slot| slot.generation == generation && !wake.is_fired());
        if !idle {
            return false;
        }
        match slots.regions.remove(region) {
            Some(slot) => {
                cancel(slot);
                true
            }
            None => false,
        }
    }

    /// Retires every region, returning their names.
    pub fn retire_all(&self) -> Vec<RegionName> {
        let drained: Vec<(RegionName, RegionSlot)> = self.lock().regions.drain().collect();
        drained
            .into_iter()
            .map(|(region, slot)| {
                cancel(slot);
                region
            })
            .collect()
    }

    // == Queries ==
    pub fn lowest_expiration(&self, region: &RegionName) -> Option<DateTime<Utc>> {
        self.lock()
            .regions
            .get(region)
            .and_then(|slot| slot.lowest_expiration)
    }

    pub fn regions(&self) -> Vec<RegionName> {
        let mut names: Vec<RegionName> = self.lock().regions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Takes the handles of all running schedulers, e.g. to await them on shutdown.
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        self.lock()
            .regions
            .values_mut()
            .filter_map(|slot| slot.task.take())
            .collect()
    }
}

fn insert_slot<F>(slots: &mut Slots, region: &RegionName, spawn: F) -> bool
where
    F: FnOnce(SlotTicket) -> JoinHandle<()>,
{
    if slots.regions.contains_key(region) {
        return false;
    }

    slots.next_generation += 1;
    let ticket = SlotTicket {
        region: region.clone(),
        generation: slots.next_generation,
        retired: Signal::new(),
    };
    let slot = RegionSlot {
        generation: ticket.generation,
        lowest_expiration: None,
        wake: Signal::new(),
        retired: ticket.retired.clone(),
        task: None,
    };
    slots.regions.insert(region.clone(), slot);

    let handle = spawn(ticket);
    if let Some(slot) = slots.regions.get_mut(region) {
        slot.task = Some(handle);
    }
    true
}

fn cancel(slot: RegionSlot) {
    slot.retired.fire();
    slot.wake.fire();
}
