//! Transactional Store Module
//!
//! The persistence boundary consumed by the cache engine. A store exposes
//! named key-value maps; every read and write happens inside a transaction
//! that is either committed as a whole or discarded.
//!
//! # Persisted Layout
//! - `entries/<REGION>` - serialized values
//! - `policies/<REGION>` - JSON-encoded expiration policies
//! - `regions` - region registry, one record per region

mod memory;

use std::future::Future;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::RegionName;
use crate::error::Result;

pub use memory::MemoryStore;

// == Persisted Names ==
pub const ENTRIES_PREFIX: &str = "entries/";
pub const POLICIES_PREFIX: &str = "policies/";
pub const REGISTRY_MAP: &str = "regions";

/// Number of times a conflicting transaction is re-run before giving up.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

// == Store Traits ==
/// A store that hands out transactions.
#[async_trait]
pub trait TransactionalStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// A unit of work over the store's named maps.
///
/// Writes are invisible to other transactions until `commit`. Dropping a
/// transaction without committing discards it.
#[async_trait]
pub trait Transaction: Send {
    /// Point lookup.
    async fn get(&mut self, map: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace.
    async fn put(&mut self, map: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove if present, reporting whether anything was removed.
    async fn remove(&mut self, map: &str, key: &str) -> Result<bool>;

    /// All entries of a map in key order, as seen by this transaction.
    async fn iterate(&mut self, map: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Drops every entry of a map.
    async fn clear(&mut self, map: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn discard(self: Box<Self>);
}

// == Region Maps ==
/// Names of the two maps backing a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMaps {
    pub entries: String,
    pub policies: String,
}

impl RegionMaps {
    pub fn for_region(region: &RegionName) -> Self {
        Self {
            entries: format!("{}{}", ENTRIES_PREFIX, region),
            policies: format!("{}{}", POLICIES_PREFIX, region),
        }
    }
}

// == Retry ==
/// Runs `operation` again while it fails with a transaction conflict.
pub async fn retry_on_conflict<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(err) if err.is_retryable() && attempt < MAX_TRANSACTION_ATTEMPTS => {
                debug!(attempt, error = %err, "Retrying conflicting transaction");
                attempt += 1;
                tokio::task::yield_now().await;
            }
            result => return result,
        }
    }
}
