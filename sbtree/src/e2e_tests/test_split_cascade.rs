//! Splits cascading up to the root, and the leaf chain they leave behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::e2e_tests::helpers::*;
use crate::serialization::{LongSerializer, StringSerializer};
use crate::storage::cache::PageCache;
use crate::storage::btree::SBTree;
use crate::testing::{TestStorage, fill, value_for};

#[test]
fn test_ascending_inserts_cascade_to_root() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("cascade");
    let model: BTreeMap<i64, String> = (0..1500).map(|k| (k, value_for(k))).collect();

    fill(&tree, model.keys().copied());

    let file_id = storage.cache.open_file("cascade.sbt").expect("file id");
    let pages = storage.cache.filled_up_to(file_id).expect("pages");
    // About ten entries per leaf; half-full leaves after ascending splits.
    assert!(pages > 150, "only {pages} pages allocated");
    assert_matches_model(&tree, &model);
    assert_eq!(storage.pinned_pages(), 0);
}

#[test]
fn test_sibling_chain_forward_and_backward() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("chain");
    let keys: Vec<i64> = (0..800).map(|i| (i * 7919) % 800).collect();
    fill(&tree, keys);

    let forward: Vec<i64> = tree
        .iterate_entries_major(&0, true, true)
        .map(|entry| entry.map(|(key, _)| key))
        .collect::<Result<_, _>>()
        .expect("forward");
    assert_eq!(forward, (0..800).collect::<Vec<_>>());

    let backward: Vec<i64> = tree
        .iterate_entries_minor(&799, true, false)
        .map(|entry| entry.map(|(key, _)| key))
        .collect::<Result<_, _>>()
        .expect("backward");
    assert_eq!(backward, (0..800).rev().collect::<Vec<_>>());

    let all_descending = tree.get_values_minor(&i64::MAX, true, None).expect("minor");
    assert_eq!(all_descending.len(), 800);
    assert_eq!(all_descending.first(), Some(&value_for(799)));
    assert_eq!(all_descending.last(), Some(&value_for(0)));
}

#[test]
fn test_removals_leave_empty_leaves_walkable() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("sparse");
    fill(&tree, 0..600);

    // Empty out whole leaves in the middle; buckets are never merged.
    for key in 100..500 {
        assert_eq!(tree.remove(&key).expect("remove"), Some(value_for(key)));
    }

    assert_eq!(tree.size().expect("size"), 200);
    let between = keys(&tree.get_entries_between(&50, true, &550, false, None).expect("between"));
    let expected: Vec<i64> = (50..100).chain(500..550).collect();
    assert_eq!(between, expected);

    let minor = keys(&tree.get_entries_minor(&450, true, Some(3)).expect("minor"));
    assert_eq!(minor, vec![99, 98, 97]);
    let major = keys(&tree.get_entries_major(&150, false, Some(2)).expect("major"));
    assert_eq!(major, vec![500, 501]);

    fill(&tree, 200..210);
    assert_eq!(tree.get(&205).expect("get"), Some(value_for(205)));
    assert_eq!(tree.size().expect("size"), 210);
}

#[test]
fn test_large_keys_split_with_few_entries() {
    let storage = TestStorage::small();
    let tree: SBTree<String, String> = storage.tree(TreeConfig::default());
    tree.create("wide", Arc::new(StringSerializer), Arc::new(StringSerializer), 1)
        .expect("create");

    // 20-byte serialized keys: a handful per bucket.
    let keys: Vec<String> = (0..200).map(|i| format!("key-{i:012}")).collect();
    for key in keys.iter().rev() {
        tree.put(key, &"v".to_string()).expect("put");
    }

    assert_eq!(tree.size().expect("size"), 200);
    let scanned: Vec<String> = tree
        .key_cursor()
        .collect::<Result<_, _>>()
        .expect("scan");
    assert_eq!(scanned, keys);
    assert_eq!(tree.first_key().expect("first"), keys.first().cloned());
}

#[test]
fn test_fixed_width_values() {
    let storage = TestStorage::small();
    let tree: SBTree<i64, i64> = storage.tree(TreeConfig::default());
    tree.create("fixed", Arc::new(LongSerializer), Arc::new(LongSerializer), 1)
        .expect("create");

    for key in 0..500 {
        tree.put(&key, &(key * key)).expect("put");
    }
    for key in (0..500).step_by(3) {
        tree.put(&key, &-key).expect("update in place");
    }

    assert_eq!(tree.get(&9).expect("get"), Some(-9));
    assert_eq!(tree.get(&10).expect("get"), Some(100));
    assert_eq!(
        tree.get_values_between(&10, true, &12, true, None).expect("between"),
        vec![100, 121, -12]
    );
}
