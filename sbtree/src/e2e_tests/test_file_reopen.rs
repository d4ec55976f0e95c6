//! Trees persisted through the file-backed cache survive a restart.

use std::sync::Arc;

use crate::config::TreeConfig;
use crate::serialization::{LongSerializer, SerializerRegistry, StringSerializer};
use crate::storage::btree::SBTree;
use crate::storage::file::FilePageCache;
use crate::storage::wal::NoopDurability;
use crate::testing::{init_tracing, value_for};

const PAGE_SIZE: usize = 512;

fn file_tree(dir: &std::path::Path, config: TreeConfig) -> SBTree<i64, String> {
    let cache = Arc::new(FilePageCache::new(dir, PAGE_SIZE).expect("file cache"));
    SBTree::new(config, cache, Arc::new(NoopDurability::new()))
}

#[test]
fn test_reopen_after_close() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let config = TreeConfig::default().with_null_key_support(true);

    {
        let tree = file_tree(dir.path(), config.clone());
        tree.create("persisted", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
            .expect("create");
        for key in (0..2000).rev() {
            tree.put(&key, &value_for(key)).expect("put");
        }
        tree.put(&7, &"q".repeat(2000)).expect("put overflow value");
        tree.put_null(&"null".to_string()).expect("put null");
        tree.close(true).expect("close");
    }
    assert!(dir.path().join("persisted.sbt").exists());
    assert!(dir.path().join("persisted.nbt").exists());

    let tree = file_tree(dir.path(), config);
    let registry = SerializerRegistry::<i64>::new().with(Arc::new(LongSerializer));
    tree.load("persisted", &registry, Arc::new(StringSerializer))
        .expect("load");

    assert_eq!(tree.size().expect("size"), 2001);
    assert_eq!(tree.get(&7).expect("get"), Some("q".repeat(2000)));
    assert_eq!(tree.get(&1999).expect("get"), Some(value_for(1999)));
    assert_eq!(tree.get_null().expect("get null"), Some("null".to_string()));
    assert_eq!(tree.first_key().expect("first"), Some(0));
    assert_eq!(tree.last_key().expect("last"), Some(1999));
    assert_eq!(
        tree.get_values_between(&100, true, &102, true, None)
            .expect("between"),
        vec![value_for(100), value_for(101), value_for(102)]
    );
}

#[test]
fn test_flush_then_reopen_in_new_cache() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");

    let writer = file_tree(dir.path(), TreeConfig::default());
    writer
        .create("flushed", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
        .expect("create");
    for key in 0..300 {
        writer.put(&key, &value_for(key)).expect("put");
    }
    writer.flush().expect("flush");

    let reader = file_tree(dir.path(), TreeConfig::default());
    reader
        .open("flushed", Arc::new(LongSerializer), Arc::new(StringSerializer))
        .expect("open");
    assert_eq!(reader.size().expect("size"), 300);
    assert_eq!(reader.get(&150).expect("get"), Some(value_for(150)));
}

#[test]
fn test_delete_removes_files() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let config = TreeConfig::default().with_null_key_support(true);

    let tree = file_tree(dir.path(), config.clone());
    tree.create("gone", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
        .expect("create");
    tree.put(&1, &value_for(1)).expect("put");
    tree.delete().expect("delete");
    assert!(!dir.path().join("gone.sbt").exists());
    assert!(!dir.path().join("gone.nbt").exists());

    tree.create("kept", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
        .expect("create");
    tree.close(true).expect("close");

    let other = file_tree(dir.path(), config);
    other.delete_without_load("kept").expect("delete without load");
    assert!(!dir.path().join("kept.sbt").exists());
}
