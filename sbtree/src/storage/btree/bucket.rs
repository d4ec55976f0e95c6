//! On-page layout of one tree node.
//!
//! A bucket is a slotted page: a position array grows upward from a fixed
//! header and entry payloads grow downward from the end of the page. The
//! free space is the gap between the two.
//!
//! # Page Layout
//!
//! ```text
//! +----------+---------------------------------------------+
//! | 0-3      | free pointer (i32)                          |
//! | 4-7      | entry count (i32)                           |
//! | 8        | is leaf (u8)                                |
//! | 9-16     | left sibling (i64, -1 = none)               |
//! | 17-24    | right sibling (i64, -1 = none)              |
//! | 25-32    | tree size (i64, root only)                  |
//! | 33       | key size (u8, root only)                    |
//! | 34       | key serializer id (u8, root only)           |
//! | 35-...   | entry positions (i32 each)                  |
//! | ...      | free space                                  |
//! | ...-N    | entry payloads, growing down                |
//! +----------+---------------------------------------------+
//! ```
//!
//! Leaf payload: `[key][value]`. Internal payload:
//! `[left child i64][right child i64][key]`.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::key::KeyComparator;
use crate::serialization::{BinarySerializer, SerializerError, read_array};
use crate::storage::btree::value_page::{StoredValue, decode_link, encode_link};
use crate::storage::cache::PageIndex;
use crate::storage::page::Page;

pub const FREE_POINTER_OFFSET: usize = 0;
pub const SIZE_OFFSET: usize = 4;
pub const IS_LEAF_OFFSET: usize = 8;
pub const LEFT_SIBLING_OFFSET: usize = 9;
pub const RIGHT_SIBLING_OFFSET: usize = 17;
pub const TREE_SIZE_OFFSET: usize = 25;
pub const KEY_SIZE_OFFSET: usize = 33;
pub const KEY_SERIALIZER_OFFSET: usize = 34;
pub const POSITIONS_ARRAY_OFFSET: usize = 35;

/// Size of one entry in the position array.
pub const POSITION_SIZE: usize = 4;

/// Bytes of child links preceding the key of an internal entry.
const CHILD_LINKS_SIZE: usize = 16;

const INLINE_MARKER: u8 = 0;
const LINK_MARKER: u8 = 1;

/// Largest payload accepted into a bucket of `page_size` bytes.
///
/// Any four entries of this size fit into an empty bucket, so a split
/// always leaves room for the entry that triggered it. Pages too small to
/// hold a header and four positions admit nothing.
#[must_use]
pub const fn max_entry_size(page_size: usize) -> usize {
    (page_size.saturating_sub(POSITIONS_ARRAY_OFFSET) / 4).saturating_sub(POSITION_SIZE)
}

/// Key and value codecs plus the key order of one tree.
pub struct EntryCodec<K, V> {
    key_serializer: Arc<dyn BinarySerializer<K>>,
    value_serializer: Arc<dyn BinarySerializer<V>>,
    comparator: Arc<dyn KeyComparator<K>>,
}

impl<K, V> EntryCodec<K, V> {
    #[must_use]
    pub fn new(
        key_serializer: Arc<dyn BinarySerializer<K>>,
        value_serializer: Arc<dyn BinarySerializer<V>>,
        comparator: Arc<dyn KeyComparator<K>>,
    ) -> Self {
        Self {
            key_serializer,
            value_serializer,
            comparator,
        }
    }

    #[must_use]
    pub fn key_serializer(&self) -> &dyn BinarySerializer<K> {
        self.key_serializer.as_ref()
    }

    #[must_use]
    pub fn value_serializer(&self) -> &dyn BinarySerializer<V> {
        self.value_serializer.as_ref()
    }

    #[must_use]
    pub fn compare(&self, a: &K, b: &K) -> Ordering {
        self.comparator.compare(a, b)
    }

    /// Whether values are stored as raw fixed-width bytes, without the
    /// inline/link marker.
    #[must_use]
    pub fn fixed_width_values(&self) -> bool {
        self.value_serializer.fixed_length().is_some()
    }

    pub fn encode_value(
        &self,
        value: &StoredValue<V>,
        out: &mut Vec<u8>,
    ) -> Result<(), BucketError> {
        match (value, self.fixed_width_values()) {
            (StoredValue::Inline(v), true) => self.value_serializer.serialize_native(v, out)?,
            (StoredValue::Overflow(_), true) => return Err(BucketError::UnexpectedOverflowLink),
            (StoredValue::Inline(v), false) => {
                out.push(INLINE_MARKER);
                self.value_serializer.serialize_native(v, out)?;
            }
            (StoredValue::Overflow(page), false) => {
                out.push(LINK_MARKER);
                out.extend_from_slice(&encode_link(Some(*page)).to_le_bytes());
            }
        }
        Ok(())
    }

    pub fn decode_value(&self, buf: &[u8]) -> Result<StoredValue<V>, BucketError> {
        if self.fixed_width_values() {
            return Ok(StoredValue::Inline(
                self.value_serializer.deserialize_native(buf)?,
            ));
        }
        let (marker, rest) = split_marker(buf)?;
        match marker {
            INLINE_MARKER => Ok(StoredValue::Inline(
                self.value_serializer.deserialize_native(rest)?,
            )),
            LINK_MARKER => decode_link(i64::from_le_bytes(read_array(rest, 0)?))
                .map(StoredValue::Overflow)
                .ok_or(BucketError::InvalidChild),
            other => Err(BucketError::InvalidValueMarker(other)),
        }
    }

    /// Encoded size of the value starting at the beginning of `buf`.
    pub fn value_size_in(&self, buf: &[u8]) -> Result<usize, BucketError> {
        if let Some(len) = self.value_serializer.fixed_length() {
            return Ok(len);
        }
        let (marker, rest) = split_marker(buf)?;
        match marker {
            INLINE_MARKER => Ok(1 + self.value_serializer.object_size_in(rest)?),
            LINK_MARKER => Ok(1 + 8),
            other => Err(BucketError::InvalidValueMarker(other)),
        }
    }

    pub fn encode_leaf_entry(&self, key: &K, value: &StoredValue<V>) -> Result<Vec<u8>, BucketError> {
        let mut out = Vec::with_capacity(self.key_serializer.object_size(key) + 9);
        self.key_serializer.serialize_native(key, &mut out)?;
        self.encode_value(value, &mut out)?;
        Ok(out)
    }

    pub fn encode_internal_entry(
        &self,
        left_child: PageIndex,
        right_child: PageIndex,
        key: &K,
    ) -> Result<Vec<u8>, BucketError> {
        let mut out =
            Vec::with_capacity(CHILD_LINKS_SIZE + self.key_serializer.object_size(key));
        out.extend_from_slice(&encode_link(Some(left_child)).to_le_bytes());
        out.extend_from_slice(&encode_link(Some(right_child)).to_le_bytes());
        self.key_serializer.serialize_native(key, &mut out)?;
        Ok(out)
    }
}

fn split_marker(buf: &[u8]) -> Result<(u8, &[u8]), BucketError> {
    buf.split_first()
        .map(|(marker, rest)| (*marker, rest))
        .ok_or(BucketError::Serializer(SerializerError::BufferTooShort {
            needed: 1,
            available: 0,
        }))
}

/// A decoded bucket entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketEntry<K, V> {
    Leaf {
        key: K,
        value: StoredValue<V>,
    },
    Internal {
        left_child: PageIndex,
        right_child: PageIndex,
        key: K,
    },
}

impl<K, V> BucketEntry<K, V> {
    #[must_use]
    pub const fn key(&self) -> &K {
        match self {
            Self::Leaf { key, .. } | Self::Internal { key, .. } => key,
        }
    }

    #[must_use]
    pub fn into_key(self) -> K {
        match self {
            Self::Leaf { key, .. } | Self::Internal { key, .. } => key,
        }
    }
}

/// A view of one page as a tree node.
///
/// `P` is anything that derefs to a page: a shared reference or read guard
/// for lookups, a mutable reference for the mutation window of an atomic
/// operation.
pub struct Bucket<'c, P, K, V> {
    page: P,
    codec: &'c EntryCodec<K, V>,
}

impl<'c, P, K, V> Bucket<'c, P, K, V>
where
    P: Deref<Target = Page>,
{
    pub const fn new(page: P, codec: &'c EntryCodec<K, V>) -> Self {
        Self { page, codec }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.page.read_u8(IS_LEAF_OFFSET) != 0
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.page.read_i32(SIZE_OFFSET).max(0) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn free_pointer(&self) -> usize {
        self.page.read_i32(FREE_POINTER_OFFSET).max(0) as usize
    }

    /// Bytes available for new payloads and their positions.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.free_pointer()
            .saturating_sub(POSITIONS_ARRAY_OFFSET + self.size() * POSITION_SIZE)
    }

    #[must_use]
    pub fn left_sibling(&self) -> Option<PageIndex> {
        decode_link(self.page.read_i64(LEFT_SIBLING_OFFSET))
    }

    #[must_use]
    pub fn right_sibling(&self) -> Option<PageIndex> {
        decode_link(self.page.read_i64(RIGHT_SIBLING_OFFSET))
    }

    #[must_use]
    pub fn tree_size(&self) -> u64 {
        u64::try_from(self.page.read_i64(TREE_SIZE_OFFSET)).unwrap_or(0)
    }

    #[must_use]
    pub fn key_size(&self) -> u8 {
        self.page.read_u8(KEY_SIZE_OFFSET)
    }

    #[must_use]
    pub fn key_serializer_id(&self) -> u8 {
        self.page.read_u8(KEY_SERIALIZER_OFFSET)
    }

    fn entry_position(&self, index: usize) -> Result<usize, BucketError> {
        let size = self.size();
        if index >= size {
            return Err(BucketError::IndexOutOfBounds { index, size });
        }
        let raw = self
            .page
            .read_i32(POSITIONS_ARRAY_OFFSET + index * POSITION_SIZE);
        let lowest = POSITIONS_ARRAY_OFFSET + size * POSITION_SIZE;
        usize::try_from(raw)
            .ok()
            .filter(|position| (lowest..self.page.size()).contains(position))
            .ok_or(BucketError::CorruptPosition {
                index,
                position: raw,
            })
    }

    fn key_offset(&self, index: usize) -> Result<usize, BucketError> {
        let position = self.entry_position(index)?;
        Ok(if self.is_leaf() {
            position
        } else {
            position + CHILD_LINKS_SIZE
        })
    }

    pub fn get_key(&self, index: usize) -> Result<K, BucketError> {
        let offset = self.key_offset(index)?;
        Ok(self
            .codec
            .key_serializer()
            .deserialize_native(self.page.tail(offset))?)
    }

    /// Binary search for `key`.
    ///
    /// `Ok(index)` when present, `Err(insertion_point)` otherwise.
    pub fn find(&self, key: &K) -> Result<Result<usize, usize>, BucketError> {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.codec.compare(&self.get_key(mid)?, key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }

    pub fn get_entry(&self, index: usize) -> Result<BucketEntry<K, V>, BucketError> {
        let position = self.entry_position(index)?;
        if self.is_leaf() {
            let key_len = self
                .codec
                .key_serializer()
                .object_size_in(self.page.tail(position))?;
            let key = self
                .codec
                .key_serializer()
                .deserialize_native(self.page.tail(position))?;
            let value = self.codec.decode_value(self.page.tail(position + key_len))?;
            Ok(BucketEntry::Leaf { key, value })
        } else {
            Ok(BucketEntry::Internal {
                left_child: self.child_at(position)?,
                right_child: self.child_at(position + 8)?,
                key: self
                    .codec
                    .key_serializer()
                    .deserialize_native(self.page.tail(position + CHILD_LINKS_SIZE))?,
            })
        }
    }

    pub fn get_value(&self, index: usize) -> Result<StoredValue<V>, BucketError> {
        if !self.is_leaf() {
            return Err(BucketError::NotLeaf);
        }
        let position = self.entry_position(index)?;
        let key_len = self
            .codec
            .key_serializer()
            .object_size_in(self.page.tail(position))?;
        self.codec.decode_value(self.page.tail(position + key_len))
    }

    pub fn left_child(&self, index: usize) -> Result<PageIndex, BucketError> {
        self.internal_position(index)
            .and_then(|position| self.child_at(position))
    }

    pub fn right_child(&self, index: usize) -> Result<PageIndex, BucketError> {
        self.internal_position(index)
            .and_then(|position| self.child_at(position + 8))
    }

    fn internal_position(&self, index: usize) -> Result<usize, BucketError> {
        if self.is_leaf() {
            return Err(BucketError::NotInternal);
        }
        self.entry_position(index)
    }

    fn child_at(&self, offset: usize) -> Result<PageIndex, BucketError> {
        decode_link(self.page.read_i64(offset)).ok_or(BucketError::InvalidChild)
    }

    /// Payload size of entry `index` in bytes.
    pub fn entry_size_at(&self, index: usize) -> Result<usize, BucketError> {
        let position = self.entry_position(index)?;
        if self.is_leaf() {
            let key_len = self
                .codec
                .key_serializer()
                .object_size_in(self.page.tail(position))?;
            Ok(key_len + self.codec.value_size_in(self.page.tail(position + key_len))?)
        } else {
            let key_len = self
                .codec
                .key_serializer()
                .object_size_in(self.page.tail(position + CHILD_LINKS_SIZE))?;
            Ok(CHILD_LINKS_SIZE + key_len)
        }
    }

    /// Copy of the encoded payload of entry `index`.
    pub fn get_raw_entry(&self, index: usize) -> Result<Vec<u8>, BucketError> {
        let position = self.entry_position(index)?;
        let len = self.entry_size_at(index)?;
        if position + len > self.page.size() {
            return Err(BucketError::CorruptPosition {
                index,
                position: position as i32,
            });
        }
        Ok(self.page.read_bytes(position, len).to_vec())
    }
}

impl<'c, P, K, V> Bucket<'c, P, K, V>
where
    P: DerefMut<Target = Page>,
{
    /// Format `page` as an empty bucket.
    ///
    /// Root metadata (tree size, key size, serializer id) is left as is.
    pub fn init(page: P, codec: &'c EntryCodec<K, V>, is_leaf: bool) -> Self {
        let mut bucket = Self { page, codec };
        let page_size = bucket.page.size();
        bucket.set_free_pointer(page_size);
        bucket.set_size(0);
        bucket.page.write_u8(IS_LEAF_OFFSET, u8::from(is_leaf));
        bucket.set_left_sibling(None);
        bucket.set_right_sibling(None);
        bucket
    }

    fn set_free_pointer(&mut self, free_pointer: usize) {
        self.page.write_i32(FREE_POINTER_OFFSET, free_pointer as i32);
    }

    fn set_size(&mut self, size: usize) {
        self.page.write_i32(SIZE_OFFSET, size as i32);
    }

    pub fn set_left_sibling(&mut self, page: Option<PageIndex>) {
        self.page.write_i64(LEFT_SIBLING_OFFSET, encode_link(page));
    }

    pub fn set_right_sibling(&mut self, page: Option<PageIndex>) {
        self.page.write_i64(RIGHT_SIBLING_OFFSET, encode_link(page));
    }

    pub fn set_tree_size(&mut self, size: u64) {
        self.page.write_i64(TREE_SIZE_OFFSET, size as i64);
    }

    pub fn set_key_size(&mut self, key_size: u8) {
        self.page.write_u8(KEY_SIZE_OFFSET, key_size);
    }

    pub fn set_key_serializer_id(&mut self, id: u8) {
        self.page.write_u8(KEY_SERIALIZER_OFFSET, id);
    }

    pub fn set_left_child(&mut self, index: usize, child: PageIndex) -> Result<(), BucketError> {
        let position = self.internal_position(index)?;
        self.page.write_i64(position, encode_link(Some(child)));
        Ok(())
    }

    pub fn set_right_child(&mut self, index: usize, child: PageIndex) -> Result<(), BucketError> {
        let position = self.internal_position(index)?;
        self.page.write_i64(position + 8, encode_link(Some(child)));
        Ok(())
    }

    /// Insert an encoded entry at `index`.
    ///
    /// Returns `Ok(false)` without touching the page when the entry does not
    /// fit. For internal buckets with `update_neighbors`, the neighbouring
    /// entries' child links are patched so that each entry's right child
    /// equals the next entry's left child.
    pub fn add_entry(
        &mut self,
        index: usize,
        payload: &[u8],
        update_neighbors: bool,
    ) -> Result<bool, BucketError> {
        let size = self.size();
        if index > size {
            return Err(BucketError::IndexOutOfBounds { index, size });
        }
        if payload.len() + POSITION_SIZE > self.free_space() {
            return Ok(false);
        }

        let free_pointer = self.free_pointer() - payload.len();
        let slot = POSITIONS_ARRAY_OFFSET + index * POSITION_SIZE;
        if index < size {
            self.page
                .copy_within(slot, slot + POSITION_SIZE, (size - index) * POSITION_SIZE);
        }
        self.page.write_i32(slot, free_pointer as i32);
        self.page.write_bytes(free_pointer, payload);
        self.set_free_pointer(free_pointer);
        self.set_size(size + 1);

        if update_neighbors && !self.is_leaf() {
            let left = self.left_child(index)?;
            let right = self.right_child(index)?;
            if index < size {
                self.set_left_child(index + 1, right)?;
            }
            if index > 0 {
                self.set_right_child(index - 1, left)?;
            }
        }
        Ok(true)
    }

    /// Overwrite the value of leaf entry `index` in place.
    ///
    /// Returns `Ok(false)` when the new encoding has a different size; the
    /// caller must then remove and reinsert the entry.
    pub fn update_value(
        &mut self,
        index: usize,
        value: &StoredValue<V>,
    ) -> Result<bool, BucketError> {
        if !self.is_leaf() {
            return Err(BucketError::NotLeaf);
        }
        let position = self.entry_position(index)?;
        let key_len = self
            .codec
            .key_serializer()
            .object_size_in(self.page.tail(position))?;
        let value_offset = position + key_len;
        let current = self.codec.value_size_in(self.page.tail(value_offset))?;

        let mut encoded = Vec::with_capacity(current);
        self.codec.encode_value(value, &mut encoded)?;
        if encoded.len() != current {
            return Ok(false);
        }
        self.page.write_bytes(value_offset, &encoded);
        Ok(true)
    }

    /// Remove leaf entry `index` and compact the payload area.
    pub fn remove(&mut self, index: usize) -> Result<(), BucketError> {
        if !self.is_leaf() {
            return Err(BucketError::NotLeaf);
        }
        let size = self.size();
        let position = self.entry_position(index)?;
        let entry_size = self.entry_size_at(index)?;
        let free_pointer = self.free_pointer();

        if position > free_pointer {
            self.page.copy_within(
                free_pointer,
                free_pointer + entry_size,
                position - free_pointer,
            );
        }

        let slot = POSITIONS_ARRAY_OFFSET + index * POSITION_SIZE;
        if index + 1 < size {
            self.page.copy_within(
                slot + POSITION_SIZE,
                slot,
                (size - index - 1) * POSITION_SIZE,
            );
        }

        let new_size = size - 1;
        for i in 0..new_size {
            let slot = POSITIONS_ARRAY_OFFSET + i * POSITION_SIZE;
            let moved = self.page.read_i32(slot);
            if moved < position as i32 {
                self.page.write_i32(slot, moved + entry_size as i32);
            }
        }

        self.set_free_pointer(free_pointer + entry_size);
        self.set_size(new_size);
        Ok(())
    }

    /// Keep only the first `new_size` entries, rebuilding the payload area.
    pub fn shrink(&mut self, new_size: usize) -> Result<(), BucketError> {
        let kept = (0..new_size)
            .map(|i| self.get_raw_entry(i))
            .collect::<Result<Vec<_>, _>>()?;

        let page_size = self.page.size();
        self.set_free_pointer(page_size);
        self.set_size(0);
        self.add_all(&kept)
    }

    /// Append encoded entries in order.
    pub fn add_all(&mut self, entries: &[Vec<u8>]) -> Result<(), BucketError> {
        for entry in entries {
            if !self.add_entry(self.size(), entry, false)? {
                return Err(BucketError::EntryDoesNotFit);
            }
        }
        Ok(())
    }
}

/// Errors raised while decoding or mutating a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    /// Key or value bytes could not be decoded.
    Serializer(SerializerError),
    /// A leaf-only operation was applied to an internal bucket.
    NotLeaf,
    /// A child-link operation was applied to a leaf bucket.
    NotInternal,
    /// Entry index outside the bucket.
    IndexOutOfBounds { index: usize, size: usize },
    /// A bulk insert ran out of space.
    EntryDoesNotFit,
    /// An entry position points outside the payload area.
    CorruptPosition { index: usize, position: i32 },
    /// A child or overflow link is negative.
    InvalidChild,
    /// Unknown inline/link marker byte.
    InvalidValueMarker(u8),
    /// Fixed-width values cannot be stored out of line.
    UnexpectedOverflowLink,
}

impl std::fmt::Display for BucketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serializer(e) => write!(f, "serializer error: {e}"),
            Self::NotLeaf => write!(f, "operation requires a leaf bucket"),
            Self::NotInternal => write!(f, "operation requires an internal bucket"),
            Self::IndexOutOfBounds { index, size } => {
                write!(f, "entry index {index} out of bounds for bucket of size {size}")
            }
            Self::EntryDoesNotFit => write!(f, "entry does not fit into bucket"),
            Self::CorruptPosition { index, position } => {
                write!(f, "entry {index} has corrupt position {position}")
            }
            Self::InvalidChild => write!(f, "invalid page link"),
            Self::InvalidValueMarker(marker) => write!(f, "invalid value marker: {marker}"),
            Self::UnexpectedOverflowLink => {
                write!(f, "fixed-width values cannot be stored in overflow pages")
            }
        }
    }
}

impl std::error::Error for BucketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serializer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SerializerError> for BucketError {
    fn from(e: SerializerError) -> Self {
        Self::Serializer(e)
    }
}
