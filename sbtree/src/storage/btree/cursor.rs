//! Lazy, batched iteration over key ranges.
//!
//! A cursor holds no lock or pin between batches. Each refill runs one range
//! fetch under the shared tree lock and resumes strictly after the last key
//! it returned, so entries inserted or removed between batches may or may not
//! be observed, but no key is returned twice and order is preserved.

use std::collections::VecDeque;

use crate::error::IndexError;
use crate::key::IndexKey;
use crate::storage::btree::tree::{RangeBound, SBTree};

/// Iterator over `(key, value)` pairs of a range.
pub struct TreeCursor<'t, K: IndexKey, V> {
    tree: &'t SBTree<K, V>,
    lower: Option<(K, bool)>,
    upper: Option<(K, bool)>,
    ascending: bool,
    batch_size: usize,
    last_key: Option<K>,
    buffer: VecDeque<(K, V)>,
    exhausted: bool,
}

impl<'t, K: IndexKey, V: Clone> TreeCursor<'t, K, V> {
    pub(crate) fn new(
        tree: &'t SBTree<K, V>,
        lower: Option<(K, bool)>,
        upper: Option<(K, bool)>,
        ascending: bool,
    ) -> Self {
        Self {
            tree,
            lower,
            upper,
            ascending,
            batch_size: tree.config().cursor_prefetch_size.max(1),
            last_key: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn refill(&mut self) -> Result<(), IndexError> {
        let resume = self.last_key.as_ref().map(|key| RangeBound::new(key, false));
        let lower = self
            .lower
            .as_ref()
            .map(|(key, inclusive)| RangeBound::new(key, *inclusive));
        let upper = self
            .upper
            .as_ref()
            .map(|(key, inclusive)| RangeBound::new(key, *inclusive));
        let (lower, upper) = if self.ascending {
            (resume.or(lower), upper)
        } else {
            (lower, resume.or(upper))
        };

        let batch = self.tree.fetch_range(
            "cursor fetch",
            lower,
            upper,
            self.ascending,
            Some(self.batch_size),
        )?;
        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some((key, _)) = batch.last() {
            self.last_key = Some(key.clone());
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl<K: IndexKey, V: Clone> Iterator for TreeCursor<'_, K, V> {
    type Item = Result<(K, V), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Iterator over every key of a tree in ascending order.
pub struct KeyCursor<'t, K: IndexKey, V> {
    entries: TreeCursor<'t, K, V>,
}

impl<'t, K: IndexKey, V: Clone> KeyCursor<'t, K, V> {
    pub(crate) const fn new(entries: TreeCursor<'t, K, V>) -> Self {
        Self { entries }
    }
}

impl<K: IndexKey, V: Clone> Iterator for KeyCursor<'_, K, V> {
    type Item = Result<K, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|entry| entry.map(|(key, _)| key))
    }
}
