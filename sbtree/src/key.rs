//! Key ordering and partial-search hooks.

use std::cmp::Ordering;
use std::fmt::Debug;

use crate::serialization::{CompositeKey, KeyItem, Rid};

/// How to resolve a composite key that has fewer items than the tree's key
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialSearchMode {
    /// Search with the key as given.
    None,
    /// Bias toward the lowest full key sharing the prefix.
    LowestBoundary,
    /// Bias toward the highest full key sharing the prefix.
    HighestBoundary,
}

/// A type usable as an index key.
pub trait IndexKey: Clone + Debug + Send + Sync + 'static {
    /// Pad a partial key up to `key_size` items for the given search mode.
    ///
    /// Returns `None` when the key must be searched as given, which is always
    /// the case for single-column key types.
    fn pad_partial(&self, _key_size: usize, _mode: PartialSearchMode) -> Option<Self> {
        None
    }
}

impl IndexKey for i32 {}
impl IndexKey for i64 {}
impl IndexKey for String {}
impl IndexKey for Vec<u8> {}
impl IndexKey for Rid {}

impl IndexKey for CompositeKey {
    fn pad_partial(&self, key_size: usize, mode: PartialSearchMode) -> Option<Self> {
        let sentinel = match mode {
            PartialSearchMode::None => return None,
            PartialSearchMode::LowestBoundary => KeyItem::AlwaysLess,
            PartialSearchMode::HighestBoundary => KeyItem::AlwaysGreater,
        };
        if key_size <= 1 || self.len() >= key_size {
            return None;
        }

        let mut padded = self.clone();
        for _ in self.len()..key_size {
            padded.push(sentinel.clone());
        }
        Some(padded)
    }
}

/// Total order used by a tree. Supplied at construction time.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The key type's own `Ord`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Reverses another comparator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reversed<C>(pub C);

impl<K, C: KeyComparator<K>> KeyComparator<K> for Reversed<C> {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self.0.compare(b, a)
    }
}
