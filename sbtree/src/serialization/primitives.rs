//! Serializers for single-column key types.

use crate::serialization::{BinarySerializer, SerializerError, read_array, read_length, write_length};

/// Fixed-width little-endian `i32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerSerializer;

impl IntegerSerializer {
    pub const ID: u8 = 8;
}

impl BinarySerializer<i32> for IntegerSerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn object_size(&self, _value: &i32) -> usize {
        4
    }

    fn object_size_in(&self, _buf: &[u8]) -> Result<usize, SerializerError> {
        Ok(4)
    }

    fn serialize_native(&self, value: &i32, out: &mut Vec<u8>) -> Result<(), SerializerError> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize_native(&self, buf: &[u8]) -> Result<i32, SerializerError> {
        Ok(i32::from_le_bytes(read_array(buf, 0)?))
    }

    fn fixed_length(&self) -> Option<usize> {
        Some(4)
    }
}

/// Fixed-width little-endian `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongSerializer;

impl LongSerializer {
    pub const ID: u8 = 10;
}

impl BinarySerializer<i64> for LongSerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn object_size(&self, _value: &i64) -> usize {
        8
    }

    fn object_size_in(&self, _buf: &[u8]) -> Result<usize, SerializerError> {
        Ok(8)
    }

    fn serialize_native(&self, value: &i64, out: &mut Vec<u8>) -> Result<(), SerializerError> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize_native(&self, buf: &[u8]) -> Result<i64, SerializerError> {
        Ok(i64::from_le_bytes(read_array(buf, 0)?))
    }

    fn fixed_length(&self) -> Option<usize> {
        Some(8)
    }
}

/// UTF-8 string with an `i32` byte-length prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl StringSerializer {
    pub const ID: u8 = 13;
}

impl BinarySerializer<String> for StringSerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn object_size(&self, value: &String) -> usize {
        4 + value.len()
    }

    fn object_size_in(&self, buf: &[u8]) -> Result<usize, SerializerError> {
        Ok(4 + read_length(buf, 0)?)
    }

    fn serialize_native(&self, value: &String, out: &mut Vec<u8>) -> Result<(), SerializerError> {
        write_length(value.len(), out)?;
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn deserialize_native(&self, buf: &[u8]) -> Result<String, SerializerError> {
        let len = read_length(buf, 0)?;
        let bytes = buf.get(4..4 + len).ok_or(SerializerError::BufferTooShort {
            needed: 4 + len,
            available: buf.len(),
        })?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerializerError::InvalidUtf8)
    }
}

/// Raw bytes with an `i32` length prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl BytesSerializer {
    pub const ID: u8 = 17;
}

impl BinarySerializer<Vec<u8>> for BytesSerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn object_size(&self, value: &Vec<u8>) -> usize {
        4 + value.len()
    }

    fn object_size_in(&self, buf: &[u8]) -> Result<usize, SerializerError> {
        Ok(4 + read_length(buf, 0)?)
    }

    fn serialize_native(&self, value: &Vec<u8>, out: &mut Vec<u8>) -> Result<(), SerializerError> {
        write_length(value.len(), out)?;
        out.extend_from_slice(value);
        Ok(())
    }

    fn deserialize_native(&self, buf: &[u8]) -> Result<Vec<u8>, SerializerError> {
        let len = read_length(buf, 0)?;
        buf.get(4..4 + len)
            .map(<[u8]>::to_vec)
            .ok_or(SerializerError::BufferTooShort {
                needed: 4 + len,
                available: buf.len(),
            })
    }
}
