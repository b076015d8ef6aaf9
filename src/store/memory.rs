//! In-Memory Transactional Store
//!
//! Reference store with optimistic concurrency control: every committed key
//! carries a version stamp, each transaction remembers the versions it read,
//! and commit fails with a conflict if any of them moved.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Transaction, TransactionalStore};
use crate::error::{CacheError, Result};

// == Committed State ==
#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Tables {
    maps: HashMap<String, BTreeMap<String, Versioned>>,
    last_version: u64,
}

impl Tables {
    fn version_of(&self, map: &str, key: &str) -> Option<u64> {
        self.maps
            .get(map)
            .and_then(|entries| entries.get(key))
            .map(|v| v.version)
    }
}

// == Memory Store ==
/// Shared in-memory store. Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Names of all non-empty maps, sorted.
    pub async fn map_names(&self) -> Vec<String> {
        let tables = self.tables.read().await;
        let mut names: Vec<String> = tables.maps.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of committed entries in a map.
    pub async fn map_len(&self, map: &str) -> usize {
        let tables = self.tables.read().await;
        tables.maps.get(map).map_or(0, BTreeMap::len)
    }
}

fn check_available(unavailable: &AtomicBool) -> Result<()> {
    if unavailable.load(Ordering::SeqCst) {
        return Err(CacheError::StoreUnavailable(
            "in-memory store is offline".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        check_available(&self.unavailable)?;
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            unavailable: Arc::clone(&self.unavailable),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }))
    }
}

// == Transaction ==
/// Buffered writes against one map.
#[derive(Debug, Default)]
struct MapWrites {
    cleared: bool,
    /// `None` marks a removal
    ops: BTreeMap<String, Option<Vec<u8>>>,
}

struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
    /// Version observed for every key read from committed state
    reads: HashMap<(String, String), Option<u64>>,
    writes: BTreeMap<String, MapWrites>,
}

impl MemoryTransaction {
    fn write_slot(&mut self, map: &str) -> &mut MapWrites {
        self.writes.entry(map.to_string()).or_default()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, map: &str, key: &str) -> Result<Option<Vec<u8>>> {
        check_available(&self.unavailable)?;

        if let Some(pending) = self.writes.get(map) {
            if let Some(op) = pending.ops.get(key) {
                return Ok(op.clone());
            }
            if pending.cleared {
                return Ok(None);
            }
        }

        let tables = self.tables.read().await;
        let committed = tables.maps.get(map).and_then(|entries| entries.get(key));
        self.reads
            .entry((map.to_string(), key.to_string()))
            .or_insert_with(|| committed.map(|v| v.version));
        Ok(committed.map(|v| v.value.clone()))
    }

    async fn put(&mut self, map: &str, key: &str, value: Vec<u8>) -> Result<()> {
        check_available(&self.unavailable)?;
        self.write_slot(map).ops.insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn remove(&mut self, map: &str, key: &str) -> Result<bool> {
        let existed = self.get(map, key).await?.is_some();
        if existed {
            self.write_slot(map).ops.insert(key.to_string(), None);
        }
        Ok(existed)
    }

    async fn iterate(&mut self, map: &str) -> Result<Vec<(String, Vec<u8>)>> {
        check_available(&self.unavailable)?;

        let pending = self.writes.get(map);
        let mut view: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        if !pending.is_some_and(|p| p.cleared) {
            let tables = self.tables.read().await;
            if let Some(entries) = tables.maps.get(map) {
                view.extend(entries.iter().map(|(k, v)| (k.clone(), v.value.clone())));
            }
        }

        if let Some(pending) = pending {
            for (key, op) in &pending.ops {
                match op {
                    Some(value) => view.insert(key.clone(), value.clone()),
                    None => view.remove(key),
                };
            }
        }

        Ok(view.into_iter().collect())
    }

    async fn clear(&mut self, map: &str) -> Result<()> {
        check_available(&self.unavailable)?;
        let slot = self.write_slot(map);
        slot.cleared = true;
        slot.ops.clear();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            tables,
            unavailable,
            reads,
            writes,
        } = *self;

        check_available(&unavailable)?;
        if writes.is_empty() {
            return Ok(());
        }

        let mut tables = tables.write().await;

        for ((map, key), seen) in &reads {
            if tables.version_of(map, key) != *seen {
                return Err(CacheError::TransactionConflict(format!(
                    "'{}' in '{}' changed since it was read",
                    key, map
                )));
            }
        }

        for (map, pending) in writes {
            if pending.cleared {
                tables.maps.remove(&map);
            }
            for (key, op) in pending.ops {
                match op {
                    Some(value) => {
                        tables.last_version += 1;
                        let version = tables.last_version;
                        tables
                            .maps
                            .entry(map.clone())
                            .or_default()
                            .insert(key, Versioned { version, value });
                    }
                    None => {
                        if let Some(entries) = tables.maps.get_mut(&map) {
                            entries.remove(&key);
                        }
                    }
                }
            }
            if tables.maps.get(&map).is_some_and(BTreeMap::is_empty) {
                tables.maps.remove(&map);
            }
        }

        Ok(())
    }

    async fn discard(self: Box<Self>) {}
}
