//! Page buffers and the typed accessors the index uses to read and write them.
//!
//! Pages are fixed-size byte buffers handed out by the page cache. All
//! multi-byte integers are stored little-endian. A page can optionally track
//! every byte range it mutates so the durability layer can log (and the
//! engine can undo) the changes made by one logical operation.

/// Default page size in bytes (8KB).
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest page size a cache accepts.
///
/// Anything smaller cannot hold a bucket header plus enough entries for a
/// split to make progress.
pub const MIN_PAGE_SIZE: usize = 128;

/// One mutated byte range, with its contents before and after the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChange {
    /// Offset of the first changed byte.
    pub offset: usize,
    /// Bytes that were at `offset` before the write.
    pub before: Vec<u8>,
    /// Bytes written at `offset`.
    pub after: Vec<u8>,
}

/// A raw page buffer.
pub struct Page {
    data: Box<[u8]>,
    changes: Option<Vec<PageChange>>,
}

impl Page {
    /// Create a new zeroed page of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            changes: None,
        }
    }

    /// Create a page from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
            changes: None,
        }
    }

    /// Size of the page in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Start recording every mutation made to this page.
    ///
    /// Any changes recorded by an earlier, unfinished tracking window are
    /// discarded.
    pub fn start_tracking(&mut self) {
        self.changes = Some(Vec::new());
    }

    /// Stop tracking and return the changes recorded since `start_tracking`.
    pub fn take_changes(&mut self) -> Vec<PageChange> {
        self.changes.take().unwrap_or_default()
    }

    /// Whether mutations are currently being recorded.
    #[must_use]
    pub const fn is_tracking(&self) -> bool {
        self.changes.is_some()
    }

    /// Write the before-image of `change` back into the page, untracked.
    pub fn revert(&mut self, change: &PageChange) {
        let end = change.offset + change.before.len();
        self.data[change.offset..end].copy_from_slice(&change.before);
    }

    /// Write the after-image of `change` into the page, untracked.
    pub fn apply(&mut self, change: &PageChange) {
        let end = change.offset + change.after.len();
        self.data[change.offset..end].copy_from_slice(&change.after);
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Everything from `offset` to the end of the page.
    #[must_use]
    pub fn tail(&self, offset: usize) -> &[u8] {
        &self.data[offset..]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        let range = offset..offset + bytes.len();
        if let Some(changes) = self.changes.as_mut() {
            changes.push(PageChange {
                offset,
                before: self.data[range.clone()].to_vec(),
                after: bytes.to_vec(),
            });
        }
        self.data[range].copy_from_slice(bytes);
    }

    /// Move `len` bytes from `src` to `dest` inside the page (memmove).
    pub fn copy_within(&mut self, src: usize, dest: usize, len: usize) {
        if len == 0 || src == dest {
            return;
        }
        if let Some(changes) = self.changes.as_mut() {
            changes.push(PageChange {
                offset: dest,
                before: self.data[dest..dest + len].to_vec(),
                after: self.data[src..src + len].to_vec(),
            });
        }
        self.data.copy_within(src..src + len, dest);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    /// Read an i32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_i32(&self, offset: usize) -> i32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[offset..offset + 4]);
        i32::from_le_bytes(buf)
    }

    /// Write an i32 (little-endian) at the given offset.
    pub fn write_i32(&mut self, offset: usize, value: i32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Read an i64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_i64(&self, offset: usize) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        i64::from_le_bytes(buf)
    }

    /// Write an i64 (little-endian) at the given offset.
    pub fn write_i64(&mut self, offset: usize, value: i64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Compute the CRC32 checksum of the whole page.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.data)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("size", &self.data.len())
            .field("first_16_bytes", &&self.data[..16.min(self.data.len())])
            .field("tracking", &self.changes.is_some())
            .finish_non_exhaustive()
    }
}
