//! Composite (multi-column) keys.
//!
//! A `CompositeKey` is an ordered tuple of `KeyItem`s. Two composite keys
//! compare item by item over their common prefix only, so `[5]` and
//! `[5, 3]` are equal. Partial range searches rely on this: the tree pads a
//! short key with `AlwaysLess` / `AlwaysGreater` sentinels to push the
//! search toward the lowest or highest full key sharing the prefix.
//!
//! # Encoding
//!
//! ```text
//! +----------+------------------------------------------+
//! | 0-3      | total size in bytes (i32, includes self) |
//! | 4-7      | item count (i32)                         |
//! | 8-N      | items: type tag (u8) followed by payload |
//! +----------+------------------------------------------+
//! ```

use std::cmp::Ordering;

use crate::serialization::{BinarySerializer, SerializerError, read_array, read_length, write_length};

const HEADER_SIZE: usize = 8;

const TAG_INTEGER: u8 = 0x01;
const TAG_LONG: u8 = 0x02;
const TAG_STRING: u8 = 0x03;
const TAG_BINARY: u8 = 0x04;

/// One component of a composite key.
#[derive(Debug, Clone)]
pub enum KeyItem {
    Integer(i32),
    Long(i64),
    String(String),
    Binary(Vec<u8>),
    /// Sorts before every other item. Search-only; never stored.
    AlwaysLess,
    /// Sorts after every other item. Search-only; never stored.
    AlwaysGreater,
}

impl KeyItem {
    const fn rank(&self) -> u8 {
        match self {
            Self::AlwaysLess => 0,
            Self::Integer(_) | Self::Long(_) => 1,
            Self::String(_) => 2,
            Self::Binary(_) => 3,
            Self::AlwaysGreater => 4,
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Self::Integer(_) => 1 + 4,
            Self::Long(_) => 1 + 8,
            Self::String(s) => 1 + 4 + s.len(),
            Self::Binary(b) => 1 + 4 + b.len(),
            Self::AlwaysLess | Self::AlwaysGreater => 0,
        }
    }
}

impl Ord for KeyItem {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Long(a), Self::Long(b)) => a.cmp(b),
            (Self::Integer(a), Self::Long(b)) => i64::from(*a).cmp(b),
            (Self::Long(a), Self::Integer(b)) => a.cmp(&i64::from(*b)),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyItem {}

impl From<i32> for KeyItem {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for KeyItem {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for KeyItem {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for KeyItem {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// An ordered tuple of key items.
#[derive(Debug, Clone, Default)]
pub struct CompositeKey {
    items: Vec<KeyItem>,
}

impl CompositeKey {
    #[must_use]
    pub const fn new(items: Vec<KeyItem>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn items(&self) -> &[KeyItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append one item.
    pub fn push(&mut self, item: KeyItem) {
        self.items.push(item);
    }
}

impl<T: Into<KeyItem>> FromIterator<T> for CompositeKey {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.items
            .iter()
            .zip(&other.items)
            .map(|(a, b)| a.cmp(b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CompositeKey {}

/// Serializer for `CompositeKey`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeKeySerializer;

impl CompositeKeySerializer {
    pub const ID: u8 = 14;
}

impl BinarySerializer<CompositeKey> for CompositeKeySerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn object_size(&self, value: &CompositeKey) -> usize {
        HEADER_SIZE + value.items.iter().map(KeyItem::encoded_size).sum::<usize>()
    }

    fn object_size_in(&self, buf: &[u8]) -> Result<usize, SerializerError> {
        read_length(buf, 0)
    }

    fn serialize_native(
        &self,
        value: &CompositeKey,
        out: &mut Vec<u8>,
    ) -> Result<(), SerializerError> {
        write_length(self.object_size(value), out)?;
        write_length(value.items.len(), out)?;

        for item in &value.items {
            match item {
                KeyItem::Integer(v) => {
                    out.push(TAG_INTEGER);
                    out.extend_from_slice(&v.to_le_bytes());
                }
                KeyItem::Long(v) => {
                    out.push(TAG_LONG);
                    out.extend_from_slice(&v.to_le_bytes());
                }
                KeyItem::String(s) => {
                    out.push(TAG_STRING);
                    write_length(s.len(), out)?;
                    out.extend_from_slice(s.as_bytes());
                }
                KeyItem::Binary(b) => {
                    out.push(TAG_BINARY);
                    write_length(b.len(), out)?;
                    out.extend_from_slice(b);
                }
                KeyItem::AlwaysLess | KeyItem::AlwaysGreater => {
                    return Err(SerializerError::SentinelNotSerializable);
                }
            }
        }
        Ok(())
    }

    fn deserialize_native(&self, buf: &[u8]) -> Result<CompositeKey, SerializerError> {
        let total = read_length(buf, 0)?;
        if buf.len() < total {
            return Err(SerializerError::BufferTooShort {
                needed: total,
                available: buf.len(),
            });
        }
        let buf = &buf[..total];
        let count = read_length(buf, 4)?;

        let mut items = Vec::with_capacity(count.min(64));
        let mut offset = HEADER_SIZE;
        for _ in 0..count {
            let [tag] = read_array::<1>(buf, offset)?;
            offset += 1;
            let item = match tag {
                TAG_INTEGER => {
                    let v = i32::from_le_bytes(read_array(buf, offset)?);
                    offset += 4;
                    KeyItem::Integer(v)
                }
                TAG_LONG => {
                    let v = i64::from_le_bytes(read_array(buf, offset)?);
                    offset += 8;
                    KeyItem::Long(v)
                }
                TAG_STRING | TAG_BINARY => {
                    let len = read_length(buf, offset)?;
                    offset += 4;
                    let bytes = buf.get(offset..offset + len).ok_or(
                        SerializerError::BufferTooShort {
                            needed: offset + len,
                            available: buf.len(),
                        },
                    )?;
                    offset += len;
                    if tag == TAG_STRING {
                        KeyItem::String(
                            String::from_utf8(bytes.to_vec())
                                .map_err(|_| SerializerError::InvalidUtf8)?,
                        )
                    } else {
                        KeyItem::Binary(bytes.to_vec())
                    }
                }
                other => return Err(SerializerError::UnknownItemType(other)),
            };
            items.push(item);
        }

        Ok(CompositeKey::new(items))
    }
}
