//! Cursors fetch in batches and resume after the last returned key.

use std::sync::Arc;

use crate::config::TreeConfig;
use crate::serialization::{LongSerializer, StringSerializer};
use crate::storage::btree::SBTree;
use crate::testing::{TestStorage, fill, value_for};

fn batched_tree(storage: &TestStorage, batch: usize) -> SBTree<i64, String> {
    let config = TreeConfig {
        cursor_prefetch_size: batch,
        ..TreeConfig::default()
    };
    let tree = storage.tree(config);
    tree.create("cursor", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
        .expect("create");
    tree
}

fn collect_keys(cursor: impl Iterator<Item = Result<(i64, String), crate::error::IndexError>>) -> Vec<i64> {
    cursor
        .map(|entry| entry.map(|(key, _)| key))
        .collect::<Result<_, _>>()
        .expect("cursor")
}

#[test]
fn test_small_batches_cover_the_range() {
    let storage = TestStorage::small();
    let tree = batched_tree(&storage, 3);
    fill(&tree, 0..100);

    assert_eq!(
        collect_keys(tree.iterate_entries_between(&10, true, &20, false, true)),
        (10..20).collect::<Vec<_>>()
    );
    assert_eq!(
        collect_keys(tree.iterate_entries_between(&10, false, &20, true, false)),
        (11..=20).rev().collect::<Vec<_>>()
    );
    assert_eq!(
        collect_keys(tree.iterate_entries_major(&90, false, false)),
        (91..100).rev().collect::<Vec<_>>()
    );
    assert_eq!(
        collect_keys(tree.iterate_entries_minor(&5, false, true)),
        (0..5).collect::<Vec<_>>()
    );
    assert_eq!(tree.key_cursor().count(), 100);
}

#[test]
fn test_cursor_sees_inserts_ahead_but_not_behind() {
    let storage = TestStorage::small();
    let tree = batched_tree(&storage, 3);
    fill(&tree, (1..=10).map(|i| i * 10));

    let mut cursor = tree.iterate_entries_major(&0, true, true);
    let first = cursor.next().expect("entry").expect("no error");
    let second = cursor.next().expect("entry").expect("no error");
    assert_eq!((first.0, second.0), (10, 20));

    fill(&tree, [15, 45]);
    assert_eq!(tree.remove(&60).expect("remove"), Some(value_for(60)));

    assert_eq!(collect_keys(cursor), vec![30, 40, 45, 50, 70, 80, 90, 100]);
}

#[test]
fn test_cursor_on_cleared_tree_stops() {
    let storage = TestStorage::small();
    let tree = batched_tree(&storage, 2);
    fill(&tree, 0..10);

    let mut cursor = tree.iterate_entries_minor(&100, true, false);
    assert_eq!(cursor.next().expect("entry").expect("no error").0, 9);
    assert_eq!(cursor.next().expect("entry").expect("no error").0, 8);
    tree.clear().expect("clear");
    assert!(cursor.next().is_none());
}

#[test]
fn test_cursor_reports_detached_tree() {
    let storage = TestStorage::small();
    let tree = batched_tree(&storage, 2);
    fill(&tree, 0..10);

    let mut cursor = tree.key_cursor();
    assert_eq!(cursor.next().expect("key").expect("no error"), 0);
    assert_eq!(cursor.next().expect("key").expect("no error"), 1);
    tree.close(true).expect("close");

    let err = cursor.next().expect("error item").expect_err("detached");
    assert_eq!(err.operation, "cursor fetch");
    assert!(cursor.next().is_none());
}
