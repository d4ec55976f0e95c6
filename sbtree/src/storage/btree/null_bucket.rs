//! Page holding the value stored under the null key.
//!
//! Lives at page 0 of its own file, next to the tree file:
//!
//! ```text
//! +----------+---------------------------------------------+
//! | 0        | value present (u8)                          |
//! | 1-N      | value, encoded like a leaf value            |
//! +----------+---------------------------------------------+
//! ```

use std::ops::{Deref, DerefMut};

use crate::storage::btree::bucket::{BucketError, EntryCodec};
use crate::storage::btree::value_page::StoredValue;
use crate::storage::page::Page;

const PRESENT_OFFSET: usize = 0;
const VALUE_OFFSET: usize = 1;

pub struct NullBucket<'c, P, K, V> {
    page: P,
    codec: &'c EntryCodec<K, V>,
}

impl<'c, P, K, V> NullBucket<'c, P, K, V>
where
    P: Deref<Target = Page>,
{
    pub const fn new(page: P, codec: &'c EntryCodec<K, V>) -> Self {
        Self { page, codec }
    }

    pub fn value(&self) -> Result<Option<StoredValue<V>>, BucketError> {
        if self.page.read_u8(PRESENT_OFFSET) == 0 {
            return Ok(None);
        }
        self.codec
            .decode_value(self.page.tail(VALUE_OFFSET))
            .map(Some)
    }
}

impl<P, K, V> NullBucket<'_, P, K, V>
where
    P: DerefMut<Target = Page>,
{
    pub fn set_value(&mut self, value: &StoredValue<V>) -> Result<(), BucketError> {
        let mut encoded = Vec::new();
        self.codec.encode_value(value, &mut encoded)?;
        if VALUE_OFFSET + encoded.len() > self.page.size() {
            return Err(BucketError::EntryDoesNotFit);
        }
        self.page.write_u8(PRESENT_OFFSET, 1);
        self.page.write_bytes(VALUE_OFFSET, &encoded);
        Ok(())
    }

    pub fn remove_value(&mut self) {
        self.page.write_u8(PRESENT_OFFSET, 0);
    }
}
