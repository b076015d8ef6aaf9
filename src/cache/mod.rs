//! Cache Module
//!
//! Provides the per-partition region cache with absolute-expiration eviction.

mod engine;
mod entry;
mod registry;
mod scheduler;
mod service;
mod signal;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use engine::CacheEngine;
pub use entry::{CacheValue, ExecutionResult, ExpirationPolicy, RegionName, DEFAULT_REGION};
pub use registry::{RegionRegistry, SlotTicket};
pub use service::PartitionService;
pub use signal::Signal;
pub use stats::{describe_metrics, CacheStats, StatsSnapshot};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
