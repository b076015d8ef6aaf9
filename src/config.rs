//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Number of partitions hosted by this node
    pub partition_count: usize,
    /// Service identity handed to the topology service
    pub service_name: String,
    /// Re-scan interval in seconds for a region with no entries
    pub idle_rescan_secs: u64,
    /// Scheduler backoff in milliseconds after a failed scan
    pub scan_retry_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `PARTITION_COUNT` - Hosted partitions (default: 4)
    /// - `SERVICE_NAME` - Service identity (default: region-cache)
    /// - `IDLE_RESCAN_SECS` - Empty-region re-scan interval (default: 60)
    /// - `SCAN_RETRY_MS` - Backoff after a scan failure (default: 500)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            partition_count: parse_var("PARTITION_COUNT")
                .filter(|count: &usize| *count > 0)
                .unwrap_or(defaults.partition_count),
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            idle_rescan_secs: parse_var("IDLE_RESCAN_SECS").unwrap_or(defaults.idle_rescan_secs),
            scan_retry_ms: parse_var("SCAN_RETRY_MS").unwrap_or(defaults.scan_retry_ms),
        }
    }

    /// Scheduler settings shared by every engine on this node.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            idle_rescan: Duration::from_secs(self.idle_rescan_secs),
            scan_retry: Duration::from_millis(self.scan_retry_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            partition_count: 4,
            service_name: "region-cache".to_string(),
            idle_rescan_secs: 60,
            scan_retry_ms: 500,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

// == Engine Config ==
/// Timing knobs for a partition's expiration schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long an empty region sleeps before scanning again
    pub idle_rescan: Duration,
    /// How long to back off after a scan hits a store error
    pub scan_retry: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default().engine_config()
    }
}
