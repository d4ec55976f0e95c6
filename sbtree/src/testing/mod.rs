use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::TreeConfig;
use crate::key::IndexKey;
use crate::serialization::{LongSerializer, StringSerializer};
use crate::storage::btree::SBTree;
use crate::storage::memory::MemoryPageCache;
use crate::storage::wal::MemoryWal;

/// Page size small enough that a few dozen entries force multi-level trees.
pub const SMALL_PAGE_SIZE: usize = 256;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared page cache and write-ahead log for one test.
pub struct TestStorage {
    pub cache: Arc<MemoryPageCache>,
    pub wal: Arc<MemoryWal>,
}

impl TestStorage {
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(page_size: usize) -> Self {
        init_tracing();
        Self {
            cache: Arc::new(MemoryPageCache::new(page_size).expect("create cache")),
            wal: Arc::new(MemoryWal::new()),
        }
    }

    #[must_use]
    pub fn small() -> Self {
        Self::new(SMALL_PAGE_SIZE)
    }

    /// A detached tree over this storage.
    #[must_use]
    pub fn tree<K: IndexKey + Ord, V: Clone>(&self, config: TreeConfig) -> SBTree<K, V> {
        SBTree::new(config, self.cache.clone(), self.wal.clone())
    }

    /// A freshly created `i64 -> String` tree named `name`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn long_tree(&self, name: &str) -> SBTree<i64, String> {
        let tree = self.tree(TreeConfig::default());
        tree.create(name, Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
            .expect("create tree");
        tree
    }

    /// Pins held on any page of the cache.
    #[must_use]
    pub fn pinned_pages(&self) -> usize {
        self.cache.pinned_pages()
    }
}

/// Short value for key `key`; stays inline on small pages.
#[must_use]
pub fn value_for(key: i64) -> String {
    format!("v{key}")
}

/// Create `tree` entries for every key in `keys`.
#[allow(clippy::expect_used)]
pub fn fill(tree: &SBTree<i64, String>, keys: impl IntoIterator<Item = i64>) {
    for key in keys {
        tree.put(&key, &value_for(key)).expect("put");
    }
}
