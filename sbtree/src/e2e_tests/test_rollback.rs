//! Operations failing at every page access leave the tree untouched.

use std::collections::BTreeMap;

use crate::e2e_tests::helpers::*;
use crate::error::TreeFailure;
use crate::storage::cache::CacheError;
use crate::testing::{TestStorage, value_for};

fn assert_injected(cause: &TreeFailure) {
    assert!(
        matches!(cause, TreeFailure::Cache(CacheError::InjectedFault(_))),
        "unexpected failure: {cause}"
    );
}

#[test]
fn test_put_fails_at_every_page_access() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("faulty");
    let mut model = BTreeMap::new();
    for key in 0..120 {
        tree.put(&key, &value_for(key)).expect("put");
        model.insert(key, value_for(key));
    }

    let mut failures = 0;
    for key in 1000..1040 {
        let mut countdown = 0;
        loop {
            storage.cache.fail_after(countdown);
            let result = tree.put(&key, &value_for(key));
            storage.cache.clear_countdown();
            match result {
                Ok(()) => {
                    model.insert(key, value_for(key));
                    break;
                }
                Err(e) => {
                    assert_injected(&e.cause);
                    assert_matches_model(&tree, &model);
                    failures += 1;
                    countdown += 1;
                }
            }
        }
    }

    assert!(failures > 40);
    assert_matches_model(&tree, &model);
    assert_eq!(storage.pinned_pages(), 0);
    assert_eq!(storage.wal.active_operations(), 0);
}

#[test]
fn test_overflow_update_fails_at_every_page_access() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("faulty-overflow");
    let mut model = BTreeMap::new();
    for key in 0..40 {
        let value = if key % 4 == 0 { "o".repeat(300) } else { value_for(key) };
        tree.put(&key, &value).expect("put");
        model.insert(key, value);
    }

    for key in (0..40).step_by(2) {
        let value = format!("{key}-{}", "u".repeat(400));
        let mut countdown = 0;
        loop {
            storage.cache.fail_after(countdown);
            let result = tree.put(&key, &value);
            storage.cache.clear_countdown();
            match result {
                Ok(()) => {
                    model.insert(key, value);
                    break;
                }
                Err(e) => {
                    assert_injected(&e.cause);
                    assert_matches_model(&tree, &model);
                    countdown += 1;
                }
            }
        }
    }
    assert_matches_model(&tree, &model);
}

#[test]
fn test_remove_fails_at_every_page_access() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("faulty-remove");
    let mut model = BTreeMap::new();
    for key in 0..200 {
        let value = if key % 10 == 0 { "r".repeat(250) } else { value_for(key) };
        tree.put(&key, &value).expect("put");
        model.insert(key, value);
    }

    for key in (0..200).step_by(5) {
        let mut countdown = 0;
        loop {
            storage.cache.fail_after(countdown);
            let result = tree.remove(&key);
            storage.cache.clear_countdown();
            match result {
                Ok(removed) => {
                    assert_eq!(removed, model.remove(&key));
                    break;
                }
                Err(e) => {
                    assert_injected(&e.cause);
                    assert_matches_model(&tree, &model);
                    countdown += 1;
                }
            }
        }
    }
    assert_matches_model(&tree, &model);
}

#[test]
fn test_failed_commit_log_rolls_back_split() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("faulty-log");
    let mut model = BTreeMap::new();
    for key in 0..300 {
        storage.wal.fail_next_log();
        let err = tree.put(&key, &value_for(key)).expect_err("log fails");
        assert!(matches!(err.cause, TreeFailure::Wal(_)));

        tree.put(&key, &value_for(key)).expect("put");
        model.insert(key, value_for(key));
    }
    assert_matches_model(&tree, &model);
    assert_eq!(storage.wal.rolled_back_operations(), 300);
}
