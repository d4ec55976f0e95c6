//! The SBTree index: a persistent B+Tree over cache pages.
//!
//! # Structure
//!
//! - `bucket`: the slotted page layout shared by leaves and internal nodes
//! - `value_page`: overflow chains for large variable-length values
//! - `null_bucket`: the single value stored under the null key
//! - `operation`: the atomic operation bracket around every mutation
//! - `tree`: descent, splits, point operations, range walks and lifecycle
//! - `cursor`: batched iteration over ranges
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use sbtree::{LongSerializer, MemoryPageCache, NoopDurability, SBTree, StringSerializer, TreeConfig};
//!
//! let cache = Arc::new(MemoryPageCache::new(4096).expect("cache"));
//! let tree: SBTree<i64, String> = SBTree::new(TreeConfig::default(), cache, Arc::new(NoopDurability::new()));
//! tree.create("people", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
//!     .expect("create");
//!
//! tree.put(&7, &"seven".to_string()).expect("put");
//! assert_eq!(tree.get(&7).expect("get"), Some("seven".to_string()));
//! assert_eq!(tree.size().expect("size"), 1);
//! ```

pub mod bucket;
mod concurrency;
pub mod cursor;
pub mod null_bucket;
pub mod operation;
pub mod search;
pub mod tree;
pub mod value_page;

pub use cursor::{KeyCursor, TreeCursor};
pub use search::BucketSearchResult;
pub use tree::{ROOT_INDEX, SBTree};
pub use value_page::StoredValue;
