//! Overflow value pages.
//!
//! Variable-length values larger than the inline limit are written to a
//! linked list of pages in the tree file, and the leaf entry stores a link
//! to the first page instead of the value bytes.
//!
//! # Page Layout
//!
//! ```text
//! +----------+---------------------------------------------+
//! | 0-7      | next page index (i64, -1 = last page)       |
//! | 8-11     | whole value size (i32, -1 = freed page)     |
//! | 12-15    | bytes stored on this page (i32)             |
//! | 16-N     | value bytes                                 |
//! +----------+---------------------------------------------+
//! ```
//!
//! Freed pages are marked and left in place; like buckets orphaned by
//! splits, their space is not reused.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::error::TreeFailure;
use crate::storage::btree::operation::AtomicOperation;
use crate::storage::cache::{FileId, PageCache, PageIndex, PinnedPage};

const NEXT_PAGE_OFFSET: usize = 0;
const WHOLE_SIZE_OFFSET: usize = 8;
const CHUNK_SIZE_OFFSET: usize = 12;

/// Offset of the value bytes within an overflow page.
pub const CONTENT_OFFSET: usize = 16;

const FREED_MARKER: i32 = -1;

/// Where the bytes of one stored value live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue<V> {
    /// The value is stored in the entry itself.
    Inline(V),
    /// The value is stored in an overflow chain starting at this page.
    Overflow(PageIndex),
}

impl<V> StoredValue<V> {
    /// First overflow page, if the value lives out of line.
    #[must_use]
    pub const fn overflow_page(&self) -> Option<PageIndex> {
        match self {
            Self::Inline(_) => None,
            Self::Overflow(page) => Some(*page),
        }
    }
}

/// Value bytes that fit on one overflow page.
#[must_use]
pub const fn chunk_capacity(page_size: usize) -> usize {
    page_size - CONTENT_OFFSET
}

/// Encode an optional page link as stored on disk.
#[must_use]
pub const fn encode_link(page: Option<PageIndex>) -> i64 {
    match page {
        Some(index) => index as i64,
        None => -1,
    }
}

/// Decode an on-disk page link; negative values mean "none".
#[must_use]
pub fn decode_link(raw: i64) -> Option<PageIndex> {
    PageIndex::try_from(raw).ok()
}

/// Write `bytes` to a fresh chain of overflow pages and return its head.
pub fn write_chain(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    bytes: &[u8],
) -> Result<PageIndex, TreeFailure> {
    let cache = op.cache();
    let capacity = chunk_capacity(cache.page_size());
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![bytes]
    } else {
        bytes.chunks(capacity).collect()
    };

    let pages = chunks
        .iter()
        .map(|_| PinnedPage::allocate(cache, file_id))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, (page, chunk)) in pages.iter().zip(&chunks).enumerate() {
        let next = pages.get(i + 1).map(PinnedPage::page_index);
        op.modify(page, |p| {
            p.write_i64(NEXT_PAGE_OFFSET, encode_link(next));
            p.write_i32(WHOLE_SIZE_OFFSET, bytes.len() as i32);
            p.write_i32(CHUNK_SIZE_OFFSET, chunk.len() as i32);
            p.write_bytes(CONTENT_OFFSET, chunk);
            Ok(())
        })?;
    }

    let head = pages
        .first()
        .map(PinnedPage::page_index)
        .ok_or_else(|| TreeFailure::Corrupted("empty overflow chain".to_string()))?;

    tracing::debug!(
        page = head,
        pages = pages.len(),
        bytes = bytes.len(),
        "wrote overflow value chain"
    );
    Ok(head)
}

/// Read back the bytes of the chain starting at `first`.
pub fn read_chain(
    cache: &dyn PageCache,
    file_id: FileId,
    first: PageIndex,
) -> Result<Vec<u8>, TreeFailure> {
    let capacity = chunk_capacity(cache.page_size());
    let mut out = Vec::new();
    let mut expected: Option<usize> = None;
    let mut visited = 0usize;
    let mut next = Some(first);

    while let Some(index) = next {
        let page = PinnedPage::load(cache, file_id, index)?;
        let p = page.read();

        let whole = usize::try_from(p.read_i32(WHOLE_SIZE_OFFSET)).map_err(|_| {
            TreeFailure::Corrupted(format!("overflow page {index} has been freed"))
        })?;
        let chunk = usize::try_from(p.read_i32(CHUNK_SIZE_OFFSET))
            .ok()
            .filter(|chunk| *chunk <= capacity)
            .ok_or_else(|| {
                TreeFailure::Corrupted(format!("overflow page {index} has an invalid chunk size"))
            })?;

        let whole = *expected.get_or_insert(whole);
        visited += 1;
        if visited > whole / capacity + 1 {
            return Err(TreeFailure::Corrupted(format!(
                "overflow chain starting at page {first} is longer than its value"
            )));
        }

        out.extend_from_slice(p.read_bytes(CONTENT_OFFSET, chunk));
        next = decode_link(p.read_i64(NEXT_PAGE_OFFSET));
    }

    if Some(out.len()) != expected {
        return Err(TreeFailure::Corrupted(format!(
            "overflow chain starting at page {first} holds {} bytes, expected {expected:?}",
            out.len()
        )));
    }
    Ok(out)
}

/// Mark every page of the chain starting at `first` as freed.
///
/// Returns the number of pages freed.
pub fn free_chain(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    first: PageIndex,
) -> Result<usize, TreeFailure> {
    let cache = op.cache();
    let mut freed = 0usize;
    let mut next = Some(first);

    while let Some(index) = next {
        let page = PinnedPage::load(cache, file_id, index)?;
        next = op.modify(&page, |p| {
            if p.read_i32(WHOLE_SIZE_OFFSET) == FREED_MARKER {
                return Err(TreeFailure::Corrupted(format!(
                    "overflow page {index} freed twice"
                )));
            }
            p.write_i32(WHOLE_SIZE_OFFSET, FREED_MARKER);
            Ok(decode_link(p.read_i64(NEXT_PAGE_OFFSET)))
        })?;
        freed += 1;
    }

    tracing::debug!(page = first, pages = freed, "freed overflow value chain");
    Ok(freed)
}
