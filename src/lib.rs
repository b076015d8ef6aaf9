//! Region Cache - a partitioned key-value cache with regions and expiration
//!
//! Entries live in named regions, expire at an absolute instant and are
//! evicted by one scheduler per region per partition. A partition router
//! places each `(region, key)` on the partition owning its hash.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod partition;
pub mod router;
pub mod store;

pub use api::AppState;
pub use cache::{CacheEngine, ExecutionResult, ExpirationPolicy, RegionName};
pub use config::{Config, EngineConfig};
pub use error::{CacheError, Result};
pub use partition::{PartitionDescriptor, PartitionId};
pub use router::{LocalCluster, PartitionRouter};
pub use store::{MemoryStore, TransactionalStore};
