//! Partial composite keys resolve to the whole prefix group.

use std::sync::Arc;

use crate::config::TreeConfig;
use crate::serialization::{CompositeKey, CompositeKeySerializer, KeyItem, LongSerializer};
use crate::storage::btree::SBTree;
use crate::testing::TestStorage;

fn full(group: i64, name: &str) -> CompositeKey {
    CompositeKey::new(vec![KeyItem::Long(group), KeyItem::from(name)])
}

fn prefix(group: i64) -> CompositeKey {
    CompositeKey::new(vec![KeyItem::Long(group)])
}

fn grouped_tree(storage: &TestStorage) -> SBTree<CompositeKey, i64> {
    let tree = storage.tree(TreeConfig::default());
    tree.create("grouped", Arc::new(CompositeKeySerializer), Arc::new(LongSerializer), 2)
        .expect("create");
    let entries = [(1, "a", 10), (1, "b", 11), (2, "a", 20), (2, "c", 22), (3, "a", 30)];
    for (group, name, value) in entries {
        tree.put(&full(group, name), &value).expect("put");
    }
    tree
}

#[test]
fn test_partial_between_covers_prefix_groups() {
    let storage = TestStorage::small();
    let tree = grouped_tree(&storage);

    let values = tree
        .get_values_between(&prefix(1), true, &prefix(2), true, None)
        .expect("between");
    assert_eq!(values, vec![10, 11, 20, 22]);

    let values = tree
        .get_values_between(&prefix(1), false, &prefix(3), false, None)
        .expect("between");
    assert_eq!(values, vec![20, 22]);
}

#[test]
fn test_partial_major_and_minor() {
    let storage = TestStorage::small();
    let tree = grouped_tree(&storage);

    assert_eq!(
        tree.get_values_major(&prefix(2), true, None).expect("major"),
        vec![20, 22, 30]
    );
    assert_eq!(
        tree.get_values_major(&prefix(2), false, None).expect("major"),
        vec![30]
    );
    assert_eq!(
        tree.get_values_minor(&prefix(2), true, None).expect("minor"),
        vec![22, 20, 11, 10]
    );
    assert_eq!(
        tree.get_values_minor(&prefix(2), false, None).expect("minor"),
        vec![11, 10]
    );
}

#[test]
fn test_full_keys_and_persisted_arity() {
    let storage = TestStorage::small();
    let tree = grouped_tree(&storage);

    assert_eq!(tree.get(&full(2, "c")).expect("get"), Some(22));
    assert_eq!(tree.get(&full(2, "b")).expect("get"), None);
    assert_eq!(
        tree.get_values_between(&full(1, "b"), true, &full(2, "a"), true, None)
            .expect("between"),
        vec![11, 20]
    );

    tree.close(true).expect("close");
    tree.open("grouped", Arc::new(CompositeKeySerializer), Arc::new(LongSerializer))
        .expect("open");
    assert_eq!(tree.key_size(), Some(2));
    assert_eq!(
        tree.get_values_major(&prefix(3), true, None).expect("major"),
        vec![30]
    );
}
