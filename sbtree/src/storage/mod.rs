//! Page storage underneath the index.
//!
//! The index reads and writes fixed-size pages through a `PageCache` and
//! reports its changes to a `Durability` implementation.
//!
//! - `page`: the in-memory page buffer with change tracking
//! - `cache`: the page cache contract and pinning guard
//! - `memory`: an in-memory cache with fault injection
//! - `file`: a file-backed cache, one OS file per tree file
//! - `wal`: the durability contract and two implementations
//! - `btree`: the index itself

pub mod btree;
pub mod cache;
pub mod file;
pub mod memory;
pub mod page;
pub mod wal;

pub use cache::{CacheEntry, CacheError, FileId, PageCache, PageIndex, PinnedPage};
pub use file::FilePageCache;
pub use memory::{FaultConfig, MemoryCacheStats, MemoryPageCache};
pub use page::{DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE, Page, PageChange};
pub use wal::{Durability, MemoryWal, NoopDurability, OperationId, WalError};
