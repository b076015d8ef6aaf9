//! Property-Based Tests for Cache Module
//!
//! Drives a partition engine with random operation sequences and compares
//! it against a plain map model.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheEngine, ExecutionResult, ExpirationPolicy, RegionName};
use crate::config::EngineConfig;
use crate::partition::PartitionId;
use crate::store::MemoryStore;

// == Test Configuration ==
const TEST_TTL: Duration = Duration::from_secs(600);

// == Strategies ==
/// Generates valid cache keys (non-empty, within length limit)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,8}".prop_map(|s| s)
}

/// Generates region names in random letter case, blank meaning default
fn region_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("orders".to_string()),
        Just("Orders".to_string()),
        Just("USERS".to_string()),
        Just("users".to_string()),
    ]
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Set {
        region: String,
        key: String,
        value: Vec<u8>,
    },
    Get {
        region: String,
        key: String,
    },
    UpdatePolicy {
        region: String,
        key: String,
    },
    Delete {
        region: String,
        key: String,
    },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (
            region_strategy(),
            valid_key_strategy(),
            prop::collection::vec(any::<u8>(), 0..32)
        )
            .prop_map(|(region, key, value)| CacheOp::Set { region, key, value }),
        (region_strategy(), valid_key_strategy())
            .prop_map(|(region, key)| CacheOp::Get { region, key }),
        (region_strategy(), valid_key_strategy())
            .prop_map(|(region, key)| CacheOp::UpdatePolicy { region, key }),
        (region_strategy(), valid_key_strategy())
            .prop_map(|(region, key)| CacheOp::Delete { region, key }),
    ]
}

fn model_key(region: &str, key: &str) -> (String, String) {
    let region = RegionName::parse(Some(region)).unwrap();
    (region.as_str().to_string(), key.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Every read observes exactly the last write to the same (region, key),
    // with region names compared case-insensitively.
    #[test]
    fn prop_engine_matches_model(ops in prop::collection::vec(cache_op_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = CacheEngine::open(
                PartitionId(0),
                Arc::new(MemoryStore::new()),
                EngineConfig::default(),
            )
            .await
            .unwrap();
            let mut model: HashMap<(String, String), Vec<u8>> = HashMap::new();
            let mut expected_hits: u64 = 0;
            let mut expected_misses: u64 = 0;

            for op in ops {
                match op {
                    CacheOp::Set { region, key, value } => {
                        let name = RegionName::parse(Some(&region)).unwrap();
                        engine
                            .try_set(&name, &key, value.clone(), ExpirationPolicy::after(TEST_TTL))
                            .await
                            .unwrap();
                        model.insert(model_key(&region, &key), value);
                    }
                    CacheOp::Get { region, key } => {
                        let name = RegionName::parse(Some(&region)).unwrap();
                        let actual = engine.try_get(&name, &key).await.unwrap();
                        let expected = model.get(&model_key(&region, &key)).cloned();
                        if expected.is_some() {
                            expected_hits += 1;
                        } else {
                            expected_misses += 1;
                        }
                        assert_eq!(actual, expected, "Read mismatch for {}/{}", region, key);
                    }
                    CacheOp::UpdatePolicy { region, key } => {
                        let name = RegionName::parse(Some(&region)).unwrap();
                        let result = engine
                            .try_update_policy(&name, &key, ExpirationPolicy::after(TEST_TTL))
                            .await
                            .unwrap();
                        let present = model.contains_key(&model_key(&region, &key));
                        assert_eq!(result.is_done(), present);
                    }
                    CacheOp::Delete { region, key } => {
                        let name = RegionName::parse(Some(&region)).unwrap();
                        let result = engine.try_delete(&name, &key).await.unwrap();
                        let removed = model.remove(&model_key(&region, &key)).is_some();
                        let expected = if removed {
                            ExecutionResult::Done
                        } else {
                            ExecutionResult::NotFound
                        };
                        assert_eq!(result, expected);
                    }
                }
            }

            let stats = engine.stats();
            assert_eq!(stats.hits, expected_hits, "Hits mismatch");
            assert_eq!(stats.misses, expected_misses, "Misses mismatch");
            engine.shutdown().await;
        });
    }

    // Cleaning one region never disturbs another.
    #[test]
    fn prop_clean_region_is_isolated(
        keys in prop::collection::hash_set(valid_key_strategy(), 1..20)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = CacheEngine::open(
                PartitionId(0),
                Arc::new(MemoryStore::new()),
                EngineConfig::default(),
            )
            .await
            .unwrap();
            let doomed = RegionName::parse(Some("doomed")).unwrap();
            let kept = RegionName::parse(Some("kept")).unwrap();

            for key in &keys {
                let policy = ExpirationPolicy::after(TEST_TTL);
                engine.try_set(&doomed, key, b"x".to_vec(), policy).await.unwrap();
                engine.try_set(&kept, key, b"y".to_vec(), policy).await.unwrap();
            }

            engine.clean_region("Doomed").await.unwrap();

            for key in &keys {
                assert_eq!(engine.try_get(&doomed, key).await.unwrap(), None);
                assert_eq!(engine.try_get(&kept, key).await.unwrap(), Some(b"y".to_vec()));
            }
            engine.shutdown().await;
        });
    }
}
