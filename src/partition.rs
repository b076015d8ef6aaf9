//! Partition Descriptors
//!
//! A partition owns a contiguous, inclusive range of the signed 64-bit hash
//! space over `(region, key)` route strings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

// == Partition Descriptor ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub id: PartitionId,
    pub low_key: i64,
    pub high_key: i64,
}

impl PartitionDescriptor {
    pub fn new(id: PartitionId, low_key: i64, high_key: i64) -> Result<Self> {
        if low_key > high_key {
            return Err(CacheError::InvalidArgument(format!(
                "Partition {} has an empty range [{}, {}]",
                id, low_key, high_key
            )));
        }
        Ok(Self {
            id,
            low_key,
            high_key,
        })
    }

    pub fn contains(&self, hash: i64) -> bool {
        self.low_key <= hash && hash <= self.high_key
    }

    /// Splits the whole hash space into `count` near-equal ranges.
    pub fn uniform(count: u32) -> Result<Vec<Self>> {
        if count == 0 {
            return Err(CacheError::InvalidArgument(
                "Partition count must be at least 1".to_string(),
            ));
        }

        let span = (i64::MAX as i128 - i64::MIN as i128 + 1) / count as i128;
        (0..count)
            .map(|index| {
                let low = i64::MIN as i128 + span * index as i128;
                let high = if index + 1 == count {
                    i64::MAX as i128
                } else {
                    low + span - 1
                };
                Self::new(PartitionId(index), low as i64, high as i64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_covers_whole_space() {
        for count in [1, 2, 3, 7, 16] {
            let partitions = PartitionDescriptor::uniform(count).unwrap();
            assert_eq!(partitions.len(), count as usize);
            assert_eq!(partitions[0].low_key, i64::MIN);
            assert_eq!(partitions.last().unwrap().high_key, i64::MAX);

            for pair in partitions.windows(2) {
                assert_eq!(pair[0].high_key + 1, pair[1].low_key, "ranges must be contiguous");
            }
        }
    }

    #[test]
    fn test_contains_is_inclusive() {
        let p = PartitionDescriptor::new(PartitionId(0), -10, 10).unwrap();
        assert!(p.contains(-10));
        assert!(p.contains(10));
        assert!(!p.contains(11));
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(PartitionDescriptor::new(PartitionId(0), 5, 4).is_err());
        assert!(PartitionDescriptor::uniform(0).is_err());
    }
}
