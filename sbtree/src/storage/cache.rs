//! Page cache abstraction consumed by the index.
//!
//! The index never touches files directly. It asks a `PageCache` for pinned,
//! lockable pages addressed by `(FileId, PageIndex)`, marks the ones it
//! mutates dirty, and leaves write-back and file lifecycle to the cache.
//!
//! # Design
//!
//! - `CacheEntry` wraps one cached page behind its own `RwLock`. This is the
//!   page-level lock taken around every byte-mutation window.
//! - `PinnedPage` pins an entry for as long as it is alive and releases the
//!   pin on drop, so early returns cannot leak pins.
//! - Two implementations exist: `MemoryPageCache` for tests (with fault
//!   injection) and `FilePageCache` backed by one OS file per cache file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::page::Page;

/// Identifier of a file opened through a page cache.
pub type FileId = u32;

/// A page number inside a file (0-indexed).
pub type PageIndex = u64;

/// A cached page together with its address and pin count.
#[derive(Debug)]
pub struct CacheEntry {
    file_id: FileId,
    page_index: PageIndex,
    page: RwLock<Page>,
    pins: AtomicUsize,
}

impl CacheEntry {
    /// Wrap a page loaded or allocated for `(file_id, page_index)`.
    #[must_use]
    pub fn new(file_id: FileId, page_index: PageIndex, page: Page) -> Self {
        Self {
            file_id,
            page_index,
            page: RwLock::new(page),
            pins: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn file_id(&self) -> FileId {
        self.file_id
    }

    #[must_use]
    pub const fn page_index(&self) -> PageIndex {
        self.page_index
    }

    /// Acquire the page lock for reading.
    #[must_use]
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read().expect("page lock poisoned")
    }

    /// Acquire the page lock for writing.
    #[must_use]
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write().expect("page lock poisoned")
    }

    /// Increment the pin count.
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the pin count. Unpinning an unpinned entry is a no-op.
    pub fn unpin(&self) {
        let _ = self
            .pins
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pins| {
                pins.checked_sub(1)
            });
    }

    /// Number of outstanding pins.
    #[must_use]
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }
}

/// Contract between the index and the buffer manager.
///
/// Every page returned by `load` or `allocate_new_page` is pinned and must be
/// handed back through `release`. Use `PinnedPage` rather than calling these
/// directly.
pub trait PageCache: Send + Sync {
    /// Size in bytes of every page managed by this cache.
    fn page_size(&self) -> usize;

    /// Whether a file with this name exists (open or not).
    fn exists(&self, name: &str) -> bool;

    /// Open a file by name, creating it if it does not exist.
    ///
    /// Opening an already open file returns its existing id.
    fn open_file(&self, name: &str) -> Result<FileId, CacheError>;

    /// Load and pin an existing page.
    fn load(&self, file_id: FileId, page_index: PageIndex) -> Result<Arc<CacheEntry>, CacheError>;

    /// Append a zeroed page to the file and return it pinned.
    fn allocate_new_page(&self, file_id: FileId) -> Result<Arc<CacheEntry>, CacheError>;

    /// Release a pin taken by `load` or `allocate_new_page`.
    fn release(&self, entry: &Arc<CacheEntry>);

    /// Record that a page was modified and must be written back.
    fn mark_dirty(&self, file_id: FileId, page_index: PageIndex) -> Result<(), CacheError>;

    /// Number of pages in the file.
    fn filled_up_to(&self, file_id: FileId) -> Result<u64, CacheError>;

    /// Drop every page of the file, leaving it empty.
    fn truncate_file(&self, file_id: FileId) -> Result<(), CacheError>;

    /// Close and physically remove the file.
    fn delete_file(&self, file_id: FileId) -> Result<(), CacheError>;

    /// Close the file, optionally writing back dirty pages first.
    fn close_file(&self, file_id: FileId, flush: bool) -> Result<(), CacheError>;

    /// Write back every dirty page of the file.
    fn flush_file(&self, file_id: FileId) -> Result<(), CacheError>;
}

/// A pinned page that is released back to its cache when dropped.
pub struct PinnedPage<'c> {
    cache: &'c dyn PageCache,
    entry: Arc<CacheEntry>,
}

impl<'c> PinnedPage<'c> {
    /// Load and pin `(file_id, page_index)`.
    pub fn load(
        cache: &'c dyn PageCache,
        file_id: FileId,
        page_index: PageIndex,
    ) -> Result<Self, CacheError> {
        let entry = cache.load(file_id, page_index)?;
        Ok(Self { cache, entry })
    }

    /// Allocate a new page at the end of `file_id` and pin it.
    pub fn allocate(cache: &'c dyn PageCache, file_id: FileId) -> Result<Self, CacheError> {
        let entry = cache.allocate_new_page(file_id)?;
        Ok(Self { cache, entry })
    }

    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.entry.file_id()
    }

    #[must_use]
    pub fn page_index(&self) -> PageIndex {
        self.entry.page_index()
    }

    /// Acquire the page lock for reading.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.entry.read()
    }

    /// Acquire the page lock for writing.
    #[must_use]
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.entry.write()
    }
}

impl Clone for PinnedPage<'_> {
    /// Take another pin on the same page.
    fn clone(&self) -> Self {
        self.entry.pin();
        Self {
            cache: self.cache,
            entry: Arc::clone(&self.entry),
        }
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.entry);
    }
}

impl std::fmt::Debug for PinnedPage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("file_id", &self.entry.file_id())
            .field("page_index", &self.entry.page_index())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during page cache operations.
#[derive(Debug)]
pub enum CacheError {
    /// I/O error.
    Io(std::io::Error),
    /// The file id is not open in this cache.
    UnknownFile(FileId),
    /// Page past the end of the file.
    PageOutOfBounds {
        file_id: FileId,
        page_index: PageIndex,
        filled_up_to: u64,
    },
    /// A page read back from disk does not match its stored checksum.
    ChecksumMismatch {
        page_index: PageIndex,
        expected: u32,
        actual: u32,
    },
    /// The requested page size is below `MIN_PAGE_SIZE`.
    InvalidPageSize(usize),
    /// Injected fault for testing.
    InjectedFault(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::UnknownFile(id) => write!(f, "file {id} is not open"),
            Self::PageOutOfBounds {
                file_id,
                page_index,
                filled_up_to,
            } => write!(
                f,
                "page {page_index} out of bounds in file {file_id} (filled up to {filled_up_to})"
            ),
            Self::ChecksumMismatch {
                page_index,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch on page {page_index}: expected 0x{expected:08x}, got 0x{actual:08x}"
            ),
            Self::InvalidPageSize(size) => write!(f, "invalid page size: {size}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
