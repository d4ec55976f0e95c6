//! Result of a root-to-leaf descent.

use crate::storage::cache::PageIndex;

/// Pages visited from the root to the target bucket, plus the position of
/// the key in that bucket.
///
/// `index` follows `slice::binary_search`: `Ok(found)` or
/// `Err(insertion_point)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSearchResult {
    pub index: Result<usize, usize>,
    pub path: Vec<PageIndex>,
}

impl BucketSearchResult {
    #[must_use]
    pub const fn new(index: Result<usize, usize>, path: Vec<PageIndex>) -> Self {
        Self { index, path }
    }

    /// The bucket the search ended in.
    #[must_use]
    pub fn last_page(&self) -> Option<PageIndex> {
        self.path.last().copied()
    }

    /// Found index, or the slot a missing key would be inserted at.
    #[must_use]
    pub const fn position(&self) -> usize {
        match self.index {
            Ok(index) | Err(index) => index,
        }
    }

    /// Signed form: the found index, or `-(insertion_point) - 1`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn encoded_index(&self) -> i64 {
        match self.index {
            Ok(index) => index as i64,
            Err(insertion) => -(insertion as i64) - 1,
        }
    }

    /// Path up to, but excluding, the last page.
    #[must_use]
    pub fn parent_path(&self) -> &[PageIndex] {
        self.path.split_last().map_or(&[], |(_, parents)| parents)
    }
}
