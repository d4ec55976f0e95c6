//! Common helpers for end-to-end tests.

use std::collections::BTreeMap;

use crate::storage::btree::SBTree;

/// Assert that `tree` holds exactly the entries of `model`, in order.
#[allow(clippy::expect_used)]
pub fn assert_matches_model(tree: &SBTree<i64, String>, model: &BTreeMap<i64, String>) {
    assert_eq!(
        tree.size().expect("size"),
        model.len() as u64,
        "tree size differs from model"
    );
    let entries: Vec<(i64, String)> = tree
        .iterate_entries_major(&i64::MIN, true, true)
        .collect::<Result<_, _>>()
        .expect("scan");
    let expected: Vec<(i64, String)> = model.iter().map(|(k, v)| (*k, v.clone())).collect();
    assert_eq!(entries, expected);
}

/// Keys of `entries`.
pub fn keys<V>(entries: &[(i64, V)]) -> Vec<i64> {
    entries.iter().map(|(key, _)| *key).collect()
}

/// Keys of `model` matching `filter`, ascending.
pub fn model_keys(model: &BTreeMap<i64, String>, filter: impl Fn(i64) -> bool) -> Vec<i64> {
    model.keys().copied().filter(|key| filter(*key)).collect()
}
