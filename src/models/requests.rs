//! Request DTOs for the cache gateway API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::ExpirationPolicy;
use crate::error::{CacheError, Result};

/// Request body for PUT /cache/:key
///
/// Exactly one of `ttl` (seconds) and `absolute_expiration` must be given.
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// Target region, default namespace when absent or blank
    #[serde(default)]
    pub region: Option<String>,
    /// Any JSON value
    pub value: Value,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub absolute_expiration: Option<DateTime<Utc>>,
}

impl SetRequest {
    pub fn policy(&self) -> Result<ExpirationPolicy> {
        policy_from(self.ttl, self.absolute_expiration)
    }
}

/// Request body for PUT /cache/:key/policy
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePolicyRequest {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub absolute_expiration: Option<DateTime<Utc>>,
}

impl UpdatePolicyRequest {
    pub fn policy(&self) -> Result<ExpirationPolicy> {
        policy_from(self.ttl, self.absolute_expiration)
    }
}

/// Query string carrying an optional region (`?region=...`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionQuery {
    #[serde(default)]
    pub region: Option<String>,
}

fn policy_from(ttl: Option<u64>, absolute: Option<DateTime<Utc>>) -> Result<ExpirationPolicy> {
    match (ttl, absolute) {
        (Some(secs), None) => Ok(ExpirationPolicy::after(Duration::from_secs(secs))),
        (None, Some(at)) => Ok(ExpirationPolicy::at(at)),
        (Some(_), Some(_)) => Err(CacheError::InvalidArgument(
            "Specify either ttl or absolute_expiration, not both".to_string(),
        )),
        (None, None) => Err(CacheError::InvalidArgument(
            "An expiration is required: ttl or absolute_expiration".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"value": {"name": "ada"}, "ttl": 60}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert!(req.region.is_none());
        assert_eq!(req.value["name"], "ada");
        assert!(!req.policy().unwrap().is_expired());
    }

    #[test]
    fn test_set_request_absolute_expiration() {
        let json = r#"{"region": "users", "value": 1, "absolute_expiration": "2030-01-01T00:00:00Z"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        let policy = req.policy().unwrap();
        assert_eq!(policy.absolute_expiration.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_policy_requires_exactly_one_expiration() {
        let neither: UpdatePolicyRequest = serde_json::from_str("{}").unwrap();
        assert!(matches!(neither.policy(), Err(CacheError::InvalidArgument(_))));

        let both: UpdatePolicyRequest = serde_json::from_str(
            r#"{"ttl": 5, "absolute_expiration": "2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(both.policy(), Err(CacheError::InvalidArgument(_))));
    }

    #[test]
    fn test_region_query_defaults() {
        let query: RegionQuery = serde_json::from_str("{}").unwrap();
        assert!(query.region.is_none());
    }
}
