//! Record identifiers, the default value type of an index.

use crate::serialization::{BinarySerializer, SerializerError, read_array};

/// Physical address of a record: cluster id plus position inside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub cluster_id: i16,
    pub cluster_position: i64,
}

impl Rid {
    #[must_use]
    pub const fn new(cluster_id: i16, cluster_position: i64) -> Self {
        Self {
            cluster_id,
            cluster_position,
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}:{}", self.cluster_id, self.cluster_position)
    }
}

/// Fixed 10-byte encoding: cluster id (i16) then position (i64).
#[derive(Debug, Clone, Copy, Default)]
pub struct RidSerializer;

impl RidSerializer {
    pub const ID: u8 = 9;
    pub const SIZE: usize = 10;
}

impl BinarySerializer<Rid> for RidSerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn object_size(&self, _value: &Rid) -> usize {
        Self::SIZE
    }

    fn object_size_in(&self, _buf: &[u8]) -> Result<usize, SerializerError> {
        Ok(Self::SIZE)
    }

    fn serialize_native(&self, value: &Rid, out: &mut Vec<u8>) -> Result<(), SerializerError> {
        out.extend_from_slice(&value.cluster_id.to_le_bytes());
        out.extend_from_slice(&value.cluster_position.to_le_bytes());
        Ok(())
    }

    fn deserialize_native(&self, buf: &[u8]) -> Result<Rid, SerializerError> {
        Ok(Rid {
            cluster_id: i16::from_le_bytes(read_array(buf, 0)?),
            cluster_position: i64::from_le_bytes(read_array(buf, 2)?),
        })
    }

    fn fixed_length(&self) -> Option<usize> {
        Some(Self::SIZE)
    }
}
