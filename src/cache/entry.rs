//! Cache Entry Module
//!
//! Defines region names, expiration policies and operation outcomes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Serialized value blob stored for a `(region, key)`.
pub type CacheValue = Vec<u8>;

/// Name of the namespace used when no region is given.
pub const DEFAULT_REGION: &str = "$DEFAULT";

const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// == Region Name ==
/// Case-insensitive region name, normalized to upper case.
///
/// A blank or absent region resolves to the reserved default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionName(String);

impl RegionName {
    /// Parses an optional region, mapping blank input to the default namespace.
    pub fn parse(region: Option<&str>) -> Result<Self> {
        match region.map(str::trim) {
            None | Some("") => Ok(Self::default_region()),
            Some(name) => {
                let normalized = name.to_uppercase();
                if normalized == DEFAULT_REGION {
                    return Err(CacheError::InvalidArgument(format!(
                        "Region name '{}' is reserved",
                        name
                    )));
                }
                Ok(Self(normalized))
            }
        }
    }

    /// Parses a region that must be concrete (not blank).
    pub fn explicit(region: &str) -> Result<Self> {
        if region.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "Region cannot be empty or whitespace".to_string(),
            ));
        }
        Self::parse(Some(region))
    }

    /// The unregioned namespace.
    pub fn default_region() -> Self {
        Self(DEFAULT_REGION.to_string())
    }

    /// Rebuilds a name previously produced by `as_str`.
    pub(crate) fn from_persisted(name: String) -> Self {
        Self(name)
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_REGION
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Expiration Policy ==
/// Absolute-expiration policy attached to every cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Wall-clock instant after which the entry is eligible for eviction
    pub absolute_expiration: DateTime<Utc>,
}

impl ExpirationPolicy {
    /// Creates a policy expiring at the given instant.
    pub fn at(absolute_expiration: DateTime<Utc>) -> Self {
        Self {
            absolute_expiration,
        }
    }

    /// Creates a policy expiring `ttl` from now.
    ///
    /// TTLs longer than a century are clamped.
    pub fn after(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL))
            .unwrap_or_else(|_| chrono::Duration::zero());
        Self::at(Utc::now() + ttl)
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiration.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.absolute_expiration
    }

    /// Remaining time before expiration, zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.absolute_expiration - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// == Execution Result ==
/// Outcome of a mutating operation that may find nothing to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Done,
    NotFound,
}

impl ExecutionResult {
    pub fn is_done(self) -> bool {
        self == ExecutionResult::Done
    }
}
