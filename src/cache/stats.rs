//! Cache Statistics Module
//!
//! Tracks per-partition counters and mirrors them to the `metrics` facade.
//! Without an installed recorder the metric calls are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use metrics::{counter, describe_counter, Unit};
use serde::Serialize;

const METRIC_HITS: &str = "region_cache_hits_total";
const METRIC_MISSES: &str = "region_cache_misses_total";
const METRIC_SETS: &str = "region_cache_sets_total";
const METRIC_DELETES: &str = "region_cache_deletes_total";
const METRIC_EVICTIONS: &str = "region_cache_evictions_total";
const METRIC_REGIONS_CLEANED: &str = "region_cache_regions_cleaned_total";
const METRIC_SCAN_FAILURES: &str = "region_cache_scan_failures_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Registers descriptions for every metric this crate emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(METRIC_HITS, Unit::Count, "Total number of cache hits.");
        describe_counter!(METRIC_MISSES, Unit::Count, "Total number of cache misses.");
        describe_counter!(METRIC_SETS, Unit::Count, "Total number of committed sets.");
        describe_counter!(
            METRIC_DELETES,
            Unit::Count,
            "Total number of explicit deletes that removed an entry."
        );
        describe_counter!(
            METRIC_EVICTIONS,
            Unit::Count,
            "Total number of entries evicted after expiring."
        );
        describe_counter!(
            METRIC_REGIONS_CLEANED,
            Unit::Count,
            "Total number of regions dropped by a clean."
        );
        describe_counter!(
            METRIC_SCAN_FAILURES,
            Unit::Count,
            "Total number of expiration scans that hit a store error."
        );
    });
}

// == Cache Stats ==
/// Live counters for one partition.
#[derive(Debug, Default)]
pub struct CacheStats {
    partition: String,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    regions_cleaned: AtomicU64,
    scan_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub regions_cleaned: u64,
    pub scan_failures: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Adds another snapshot into this one.
    pub fn merge(&mut self, other: &StatsSnapshot) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.sets += other.sets;
        self.deletes += other.deletes;
        self.evictions += other.evictions;
        self.regions_cleaned += other.regions_cleaned;
        self.scan_failures += other.scan_failures;
    }
}

impl CacheStats {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            ..Self::default()
        }
    }

    fn bump(&self, cell: &AtomicU64, metric: &'static str, by: u64) {
        cell.fetch_add(by, Ordering::Relaxed);
        counter!(metric, "partition" => self.partition.clone()).increment(by);
    }

    pub fn record_hit(&self) {
        self.bump(&self.hits, METRIC_HITS, 1);
    }

    pub fn record_miss(&self) {
        self.bump(&self.misses, METRIC_MISSES, 1);
    }

    pub fn record_set(&self) {
        self.bump(&self.sets, METRIC_SETS, 1);
    }

    pub fn record_delete(&self) {
        self.bump(&self.deletes, METRIC_DELETES, 1);
    }

    pub fn record_eviction(&self) {
        self.bump(&self.evictions, METRIC_EVICTIONS, 1);
    }

    pub fn record_regions_cleaned(&self, count: u64) {
        self.bump(&self.regions_cleaned, METRIC_REGIONS_CLEANED, count);
    }

    pub fn record_scan_failure(&self) {
        self.bump(&self.scan_failures, METRIC_SCAN_FAILURES, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            regions_cleaned: self.regions_cleaned.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new("p0");
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new("p0");
        assert_eq!(stats.snapshot().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CacheStats::new("p0");
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.snapshot().hit_rate(), 0.5);
    }

    #[test]
    fn test_counters_accumulate() {
        describe_metrics();
        let stats = CacheStats::new("p0");
        stats.record_set();
        stats.record_set();
        stats.record_delete();
        stats.record_eviction();
        stats.record_regions_cleaned(3);
        stats.record_scan_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sets, 2);
        assert_eq!(snapshot.deletes, 1);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.regions_cleaned, 3);
        assert_eq!(snapshot.scan_failures, 1);
    }

    #[test]
    fn test_merge_snapshots() {
        let mut total = StatsSnapshot {
            hits: 1,
            sets: 2,
            ..StatsSnapshot::default()
        };
        total.merge(&StatsSnapshot {
            hits: 3,
            misses: 1,
            evictions: 4,
            ..StatsSnapshot::default()
        });
        assert_eq!(total.hits, 4);
        assert_eq!(total.misses, 1);
        assert_eq!(total.sets, 2);
        assert_eq!(total.evictions, 4);
    }
}
