//! Seeded random workloads checked against an in-memory model.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;
use crate::testing::TestStorage;

fn random_value(rng: &mut StdRng, key: i64) -> String {
    // Long values spill into overflow pages on small pages.
    let len = if rng.random_bool(0.1) {
        rng.random_range(20..700)
    } else {
        rng.random_range(0..8)
    };
    format!("{key}:{}", "z".repeat(len))
}

fn run_workload(seed: u64, operations: usize, key_space: i64) {
    let storage = TestStorage::small();
    let tree = storage.long_tree(&format!("random-{seed}"));
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(seed);

    for step in 0..operations {
        let key = rng.random_range(0..key_space);
        match rng.random_range(0..10) {
            0..=5 => {
                let value = random_value(&mut rng, key);
                tree.put(&key, &value).expect("put");
                model.insert(key, value);
            }
            6..=7 => {
                assert_eq!(tree.remove(&key).expect("remove"), model.remove(&key));
            }
            _ => {
                assert_eq!(tree.get(&key).expect("get"), model.get(&key).cloned());
            }
        }

        if step % 500 == 0 {
            assert_matches_model(&tree, &model);
        }
    }

    assert_matches_model(&tree, &model);
    let probe = key_space / 2;
    let below = keys(&tree.get_entries_minor(&probe, false, Some(5)).expect("minor"));
    let expected: Vec<i64> = model.range(..probe).rev().take(5).map(|(k, _)| *k).collect();
    assert_eq!(below, expected);
    assert_eq!(storage.pinned_pages(), 0);
}

#[test]
fn test_random_operations_dense_keys() {
    run_workload(7, 4000, 300);
}

#[test]
fn test_random_operations_sparse_keys() {
    run_workload(1234, 3000, 100_000);
}

#[test]
fn test_random_operations_grow_then_drain() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("drain");
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..1000 {
        let key = rng.random_range(-5000..5000);
        let value = random_value(&mut rng, key);
        tree.put(&key, &value).expect("put");
        model.insert(key, value);
    }
    assert_matches_model(&tree, &model);

    let mut remaining: Vec<i64> = model.keys().copied().collect();
    while !remaining.is_empty() {
        let key = remaining.swap_remove(rng.random_range(0..remaining.len()));
        assert_eq!(tree.remove(&key).expect("remove"), model.remove(&key));
    }

    assert_eq!(tree.size().expect("size"), 0);
    assert_eq!(tree.first_key().expect("first"), None);
    assert_eq!(tree.last_key().expect("last"), None);
}
