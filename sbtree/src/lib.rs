// SBTree: a persistent, page-based B+Tree index.
//
// Layers, bottom up:
// 1. Pages are cached and pinned by a `PageCache` (memory or file backed)
// 2. Buckets lay out sorted entries inside a page
// 3. Every mutation runs inside an `AtomicOperation` reported to `Durability`
// 4. `SBTree` descends, splits and walks buckets under a tree-wide lock
//
// Keys and values are encoded by pluggable `BinarySerializer`s; the key
// serializer id and composite key arity are persisted in the root page.

pub mod config;
pub mod error;
pub mod key;
pub mod serialization;
pub mod storage;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, TreeConfig};
pub use error::{IndexError, TreeFailure};
pub use key::{IndexKey, KeyComparator, NaturalOrder, PartialSearchMode, Reversed};
pub use serialization::{
    BinarySerializer, BytesSerializer, CompositeKey, CompositeKeySerializer, IntegerSerializer,
    KeyItem, LongSerializer, Rid, RidSerializer, SerializerError, SerializerRegistry,
    StringSerializer,
};
pub use storage::btree::{KeyCursor, SBTree, TreeCursor};
pub use storage::{
    Durability, FilePageCache, MemoryPageCache, MemoryWal, NoopDurability, PageCache,
};
