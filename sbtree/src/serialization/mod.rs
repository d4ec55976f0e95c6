//! Binary codecs for keys and values.
//!
//! The index treats serializers as opaque codecs identified by a one-byte
//! tag. The tag of the key serializer is persisted in the root page, and a
//! `SerializerRegistry` maps it back to an implementation when a tree is
//! loaded without external type information.

mod composite;
mod primitives;
mod rid;

use std::collections::HashMap;
use std::sync::Arc;

pub use composite::{CompositeKey, CompositeKeySerializer, KeyItem};
pub use primitives::{BytesSerializer, IntegerSerializer, LongSerializer, StringSerializer};
pub use rid::{Rid, RidSerializer};

/// A binary codec for values of type `T`.
///
/// Implementations must be deterministic: `object_size(v)` equals the
/// number of bytes `serialize_native(v, ..)` appends, and
/// `object_size_in(bytes)` recovers that length from the encoded form alone.
pub trait BinarySerializer<T>: Send + Sync {
    /// Persisted identity of this serializer.
    fn id(&self) -> u8;

    /// Encoded size of `value` in bytes.
    fn object_size(&self, value: &T) -> usize;

    /// Encoded size of the value starting at the beginning of `buf`.
    fn object_size_in(&self, buf: &[u8]) -> Result<usize, SerializerError>;

    /// Append the encoding of `value` to `out`.
    fn serialize_native(&self, value: &T, out: &mut Vec<u8>) -> Result<(), SerializerError>;

    /// Decode the value starting at the beginning of `buf`.
    fn deserialize_native(&self, buf: &[u8]) -> Result<T, SerializerError>;

    /// Encoded size shared by every value, if the encoding is fixed-width.
    fn fixed_length(&self) -> Option<usize> {
        None
    }

    /// Convenience wrapper around `serialize_native`.
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        let mut out = Vec::with_capacity(self.object_size(value));
        self.serialize_native(value, &mut out)?;
        Ok(out)
    }
}

/// Closed table mapping serializer tags to implementations.
pub struct SerializerRegistry<T> {
    serializers: HashMap<u8, Arc<dyn BinarySerializer<T>>>,
}

impl<T> SerializerRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            serializers: HashMap::new(),
        }
    }

    /// Register a serializer under its own tag, replacing any previous one.
    #[must_use]
    pub fn with(mut self, serializer: Arc<dyn BinarySerializer<T>>) -> Self {
        self.serializers.insert(serializer.id(), serializer);
        self
    }

    /// Look up the serializer persisted as `id`.
    pub fn resolve(&self, id: u8) -> Result<Arc<dyn BinarySerializer<T>>, SerializerError> {
        self.serializers
            .get(&id)
            .map(Arc::clone)
            .ok_or(SerializerError::UnknownSerializer(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }
}

impl<T> Default for SerializerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a fixed-size array at `offset`, failing cleanly on short input.
pub(crate) fn read_array<const N: usize>(
    buf: &[u8],
    offset: usize,
) -> Result<[u8; N], SerializerError> {
    let end = offset + N;
    if buf.len() < end {
        return Err(SerializerError::BufferTooShort {
            needed: end,
            available: buf.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..end]);
    Ok(out)
}

/// Read an i32 length prefix at `offset` and check it is non-negative.
pub(crate) fn read_length(buf: &[u8], offset: usize) -> Result<usize, SerializerError> {
    let len = i32::from_le_bytes(read_array(buf, offset)?);
    usize::try_from(len).map_err(|_| SerializerError::InvalidLength(len))
}

/// Encode a length as the i32 prefix used by variable-length serializers.
pub(crate) fn write_length(len: usize, out: &mut Vec<u8>) -> Result<(), SerializerError> {
    let len = i32::try_from(len).map_err(|_| SerializerError::ValueTooLarge(len))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Errors that can occur while encoding or decoding values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializerError {
    /// The input ends before the encoded value does.
    BufferTooShort { needed: usize, available: usize },
    /// A length prefix is negative.
    InvalidLength(i32),
    /// A value is too large to encode.
    ValueTooLarge(usize),
    /// String bytes are not valid UTF-8.
    InvalidUtf8,
    /// No serializer is registered for the persisted tag.
    UnknownSerializer(u8),
    /// Unknown composite key item type tag.
    UnknownItemType(u8),
    /// Search sentinels cannot be stored.
    SentinelNotSerializable,
}

impl std::fmt::Display for SerializerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferTooShort { needed, available } => {
                write!(f, "buffer too short: need {needed} bytes, have {available}")
            }
            Self::InvalidLength(len) => write!(f, "invalid length prefix: {len}"),
            Self::ValueTooLarge(len) => write!(f, "value too large to encode: {len} bytes"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in string value"),
            Self::UnknownSerializer(id) => write!(f, "no serializer registered for id {id}"),
            Self::UnknownItemType(tag) => write!(f, "unknown composite item type: 0x{tag:02x}"),
            Self::SentinelNotSerializable => {
                write!(f, "search boundary sentinels cannot be serialized")
            }
        }
    }
}

impl std::error::Error for SerializerError {}
