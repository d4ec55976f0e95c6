//! Readers and writers sharing one tree from several threads.

use std::thread;

use crate::e2e_tests::helpers::*;
use crate::testing::{TestStorage, value_for};

const WRITERS: i64 = 4;
const KEYS_PER_WRITER: i64 = 250;

#[test]
fn test_parallel_writers_and_readers() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("shared");

    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let tree = &tree;
            scope.spawn(move || {
                for i in 0..KEYS_PER_WRITER {
                    // Interleave the writers' key ranges.
                    let key = i * WRITERS + writer;
                    tree.put(&key, &value_for(key)).expect("put");
                }
            });
        }

        for _ in 0..2 {
            let tree = &tree;
            scope.spawn(move || {
                for _ in 0..50 {
                    let seen = keys(&tree.get_entries_major(&0, true, None).expect("scan"));
                    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
                    let descending = keys(&tree.get_entries_minor(&i64::MAX, true, Some(20)).expect("scan"));
                    assert!(descending.windows(2).all(|pair| pair[0] > pair[1]));
                }
            });
        }
    });

    let total = WRITERS * KEYS_PER_WRITER;
    assert_eq!(tree.size().expect("size"), total as u64);
    let all = keys(&tree.get_entries_major(&0, true, None).expect("scan"));
    assert_eq!(all, (0..total).collect::<Vec<_>>());
    assert_eq!(storage.pinned_pages(), 0);
    assert_eq!(storage.wal.active_operations(), 0);
}

#[test]
fn test_parallel_removes_and_updates() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("churn");
    for key in 0..400 {
        tree.put(&key, &value_for(key)).expect("put");
    }

    thread::scope(|scope| {
        let remover = &tree;
        scope.spawn(move || {
            for key in (0..400).filter(|k| k % 2 == 0) {
                assert_eq!(remover.remove(&key).expect("remove"), Some(value_for(key)));
            }
        });
        let updater = &tree;
        scope.spawn(move || {
            for key in (0..400).filter(|k| k % 2 == 1) {
                updater.put(&key, &format!("u{key}")).expect("update");
            }
        });
    });

    assert_eq!(tree.size().expect("size"), 200);
    for key in 0..400 {
        let expected = (key % 2 == 1).then(|| format!("u{key}"));
        assert_eq!(tree.get(&key).expect("get"), expected);
    }
}
