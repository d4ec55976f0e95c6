//! The SBTree index engine.
//!
//! A persistent B+Tree over pages supplied by a `PageCache`. The root bucket
//! always lives at page 0 of the tree file and also stores the tree size, the
//! composite key arity and the key serializer id, so a tree can be reattached
//! from its file alone.
//!
//! Leaves are doubly linked through their sibling pointers; range scans find
//! the boundary leaf once and then walk the chain. Buckets are split when an
//! insert does not fit and the split cascades up to the root, which grows the
//! tree by rewriting page 0 as an internal bucket. Buckets are never merged:
//! after heavy deletion leaves may be sparse or empty.
//!
//! Every public operation holds the tree lock for its whole duration (shared
//! for reads, exclusive for writes and lifecycle changes), and every mutation
//! runs inside one `AtomicOperation`.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::ops::Deref;
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::error::{DETACHED_TREE_NAME, IndexError, TreeFailure};
use crate::key::{IndexKey, KeyComparator, NaturalOrder, PartialSearchMode};
use crate::serialization::{BinarySerializer, SerializerRegistry};
use crate::storage::btree::bucket::{
    Bucket, BucketEntry, BucketError, EntryCodec, KEY_SERIALIZER_OFFSET, KEY_SIZE_OFFSET,
    max_entry_size,
};
use crate::storage::btree::concurrency::SharedResource;
use crate::storage::btree::cursor::{KeyCursor, TreeCursor};
use crate::storage::btree::null_bucket::NullBucket;
use crate::storage::btree::operation::AtomicOperation;
use crate::storage::btree::search::BucketSearchResult;
use crate::storage::btree::value_page::{self, StoredValue};
use crate::storage::cache::{CacheError, FileId, PageCache, PageIndex, PinnedPage};
use crate::storage::page::{MIN_PAGE_SIZE, Page};
use crate::storage::wal::Durability;

/// Page index of the root bucket.
pub const ROOT_INDEX: PageIndex = 0;

/// Size limits derived from the configuration and the page size.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_key_size: usize,
    max_inline_value_size: usize,
    max_entry_size: usize,
}

impl Limits {
    fn new(config: &TreeConfig, page_size: usize) -> Result<Self, TreeFailure> {
        if page_size < MIN_PAGE_SIZE {
            return Err(CacheError::InvalidPageSize(page_size).into());
        }
        let entry = max_entry_size(page_size);
        Ok(Self {
            max_key_size: config.max_key_size.min(entry / 2),
            // Leaves room for the key, the inline marker and a link.
            max_inline_value_size: config
                .max_embedded_value_size
                .min((entry / 2).saturating_sub(9)),
            max_entry_size: entry,
        })
    }
}

struct AttachedTree<K, V> {
    name: String,
    file_id: FileId,
    null_file_id: Option<FileId>,
    codec: EntryCodec<K, V>,
    key_size: u8,
    limits: Limits,
}

impl<K: IndexKey, V: Clone> AttachedTree<K, V> {
    fn search_key<'k>(&self, key: &'k K, mode: PartialSearchMode) -> Cow<'k, K> {
        key.pad_partial(usize::from(self.key_size), mode)
            .map_or(Cow::Borrowed(key), Cow::Owned)
    }

    fn resolve(&self, cache: &dyn PageCache, stored: &StoredValue<V>) -> Result<V, TreeFailure> {
        match stored {
            StoredValue::Inline(value) => Ok(value.clone()),
            StoredValue::Overflow(first) => {
                let bytes = value_page::read_chain(cache, self.file_id, *first)?;
                Ok(self.codec.value_serializer().deserialize_native(&bytes)?)
            }
        }
    }

    fn null_file(&self) -> Result<FileId, TreeFailure> {
        self.null_file_id.ok_or(TreeFailure::NullKeysNotSupported)
    }
}

/// One end of a key range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RangeBound<'k, K> {
    pub key: &'k K,
    pub inclusive: bool,
}

impl<'k, K> RangeBound<'k, K> {
    pub const fn new(key: &'k K, inclusive: bool) -> Self {
        Self { key, inclusive }
    }
}

/// State captured from a full bucket before it is split.
struct SplitPlan<K> {
    is_leaf: bool,
    index_to_split: usize,
    separator: K,
    left_entries: Vec<Vec<u8>>,
    right_entries: Vec<Vec<u8>>,
    right_sibling: Option<PageIndex>,
}

/// A persistent ordered map from `K` to `V`.
pub struct SBTree<K: IndexKey, V> {
    config: TreeConfig,
    cache: Arc<dyn PageCache>,
    durability: Arc<dyn Durability>,
    comparator: Arc<dyn KeyComparator<K>>,
    state: SharedResource<Option<AttachedTree<K, V>>>,
}

impl<K: IndexKey + Ord, V: Clone> SBTree<K, V> {
    /// A detached tree ordered by `K`'s own `Ord`.
    #[must_use]
    pub fn new(
        config: TreeConfig,
        cache: Arc<dyn PageCache>,
        durability: Arc<dyn Durability>,
    ) -> Self {
        Self::with_comparator(config, cache, durability, Arc::new(NaturalOrder))
    }
}

impl<K: IndexKey, V: Clone> SBTree<K, V> {
    /// A detached tree ordered by `comparator`.
    #[must_use]
    pub fn with_comparator(
        config: TreeConfig,
        cache: Arc<dyn PageCache>,
        durability: Arc<dyn Durability>,
        comparator: Arc<dyn KeyComparator<K>>,
    ) -> Self {
        Self {
            config,
            cache,
            durability,
            comparator,
            state: SharedResource::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Name of the attached tree.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.state.shared().as_ref().map(|tree| tree.name.clone())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.shared().is_some()
    }

    /// Composite key arity of the attached tree.
    #[must_use]
    pub fn key_size(&self) -> Option<usize> {
        self.state
            .shared()
            .as_ref()
            .map(|tree| usize::from(tree.key_size))
    }

    fn file_name(&self, name: &str) -> String {
        format!("{name}{}", self.config.file_extension)
    }

    fn null_file_name(&self, name: &str) -> String {
        format!("{name}{}", self.config.null_file_extension)
    }

    fn with_shared<R>(
        &self,
        operation: &str,
        body: impl FnOnce(&AttachedTree<K, V>) -> Result<R, TreeFailure>,
    ) -> Result<R, IndexError> {
        let state = self.state.shared();
        let tree = state.as_ref().ok_or_else(|| {
            IndexError::new(DETACHED_TREE_NAME, operation, TreeFailure::NotOpen)
        })?;
        body(tree).map_err(|cause| IndexError::new(tree.name.as_str(), operation, cause))
    }

    fn with_exclusive<R>(
        &self,
        operation: &str,
        body: impl FnOnce(&AttachedTree<K, V>) -> Result<R, TreeFailure>,
    ) -> Result<R, IndexError> {
        let state = self.state.exclusive();
        let tree = state.as_ref().ok_or_else(|| {
            IndexError::new(DETACHED_TREE_NAME, operation, TreeFailure::NotOpen)
        })?;
        body(tree).map_err(|cause| IndexError::new(tree.name.as_str(), operation, cause))
    }

    fn atomically<'s, R>(
        &'s self,
        description: &str,
        body: impl FnOnce(&mut AtomicOperation<'s>) -> Result<R, TreeFailure>,
    ) -> Result<R, TreeFailure> {
        AtomicOperation::run(
            self.cache.as_ref(),
            self.durability.as_ref(),
            description,
            body,
        )
    }

    /// Create (or reinitialize) the tree stored under `name`.
    pub fn create(
        &self,
        name: &str,
        key_serializer: Arc<dyn BinarySerializer<K>>,
        value_serializer: Arc<dyn BinarySerializer<V>>,
        key_size: usize,
    ) -> Result<(), IndexError> {
        let mut state = self.state.exclusive();
        let fail = |cause| IndexError::new(name, "create", cause);
        if state.is_some() {
            return Err(fail(TreeFailure::AlreadyOpen));
        }

        let tree = self
            .create_tree(name, key_serializer, value_serializer, key_size)
            .map_err(fail)?;
        tracing::info!(tree = %name, key_size, "created sbtree");
        *state = Some(tree);
        Ok(())
    }

    fn create_tree(
        &self,
        name: &str,
        key_serializer: Arc<dyn BinarySerializer<K>>,
        value_serializer: Arc<dyn BinarySerializer<V>>,
        key_size: usize,
    ) -> Result<AttachedTree<K, V>, TreeFailure> {
        let key_size = u8::try_from(key_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or(TreeFailure::InvalidKeySize(key_size))?;

        let cache = self.cache.as_ref();
        let limits = Limits::new(&self.config, cache.page_size())?;
        let file_id = cache.open_file(&self.file_name(name))?;
        let null_file_id = self.open_null_file(name)?;
        if let Some(null_file_id) = null_file_id {
            cache.truncate_file(null_file_id)?;
        }

        let tree = AttachedTree {
            name: name.to_string(),
            file_id,
            null_file_id,
            codec: EntryCodec::new(
                key_serializer,
                value_serializer,
                Arc::clone(&self.comparator),
            ),
            key_size,
            limits,
        };
        self.atomically("create", |op| Self::init_root(op, &tree))?;
        Ok(tree)
    }

    fn open_null_file(&self, name: &str) -> Result<Option<FileId>, TreeFailure> {
        if !self.config.null_key_support {
            return Ok(None);
        }
        Ok(Some(self.cache.open_file(&self.null_file_name(name))?))
    }

    fn init_root(op: &mut AtomicOperation<'_>, tree: &AttachedTree<K, V>) -> Result<(), TreeFailure> {
        let cache = op.cache();
        let root = if cache.filled_up_to(tree.file_id)? == 0 {
            PinnedPage::allocate(cache, tree.file_id)?
        } else {
            PinnedPage::load(cache, tree.file_id, ROOT_INDEX)?
        };
        op.modify(&root, |p| {
            let mut root = Bucket::init(p, &tree.codec, true);
            root.set_tree_size(0);
            root.set_key_size(tree.key_size);
            root.set_key_serializer_id(tree.codec.key_serializer().id());
            Ok(())
        })
    }

    /// Attach to an existing tree, checking its persisted key serializer.
    pub fn open(
        &self,
        name: &str,
        key_serializer: Arc<dyn BinarySerializer<K>>,
        value_serializer: Arc<dyn BinarySerializer<V>>,
    ) -> Result<(), IndexError> {
        let expected = key_serializer.id();
        self.attach(name, "open", value_serializer, move |found| {
            if found == expected {
                Ok(key_serializer)
            } else {
                Err(TreeFailure::SerializerMismatch { expected, found })
            }
        })
    }

    /// Attach to an existing tree, resolving the key serializer from the id
    /// persisted in its root page.
    pub fn load(
        &self,
        name: &str,
        registry: &SerializerRegistry<K>,
        value_serializer: Arc<dyn BinarySerializer<V>>,
    ) -> Result<(), IndexError> {
        self.attach(name, "load", value_serializer, |found| {
            Ok(registry.resolve(found)?)
        })
    }

    fn attach(
        &self,
        name: &str,
        operation: &str,
        value_serializer: Arc<dyn BinarySerializer<V>>,
        resolve: impl FnOnce(u8) -> Result<Arc<dyn BinarySerializer<K>>, TreeFailure>,
    ) -> Result<(), IndexError> {
        let mut state = self.state.exclusive();
        let fail = |cause| IndexError::new(name, operation, cause);
        if state.is_some() {
            return Err(fail(TreeFailure::AlreadyOpen));
        }

        let tree = self
            .attach_tree(name, value_serializer, resolve)
            .map_err(fail)?;
        tracing::info!(
            tree = %name,
            operation,
            key_serializer = tree.codec.key_serializer().id(),
            key_size = tree.key_size,
            "attached sbtree"
        );
        *state = Some(tree);
        Ok(())
    }

    fn attach_tree(
        &self,
        name: &str,
        value_serializer: Arc<dyn BinarySerializer<V>>,
        resolve: impl FnOnce(u8) -> Result<Arc<dyn BinarySerializer<K>>, TreeFailure>,
    ) -> Result<AttachedTree<K, V>, TreeFailure> {
        let cache = self.cache.as_ref();
        let limits = Limits::new(&self.config, cache.page_size())?;
        let file_name = self.file_name(name);
        if !cache.exists(&file_name) {
            return Err(TreeFailure::TreeNotFound(file_name));
        }

        let file_id = cache.open_file(&file_name)?;
        let opened = Self::read_root_header(cache, file_id)
            .and_then(|(serializer_id, key_size)| Ok((resolve(serializer_id)?, key_size)))
            .and_then(|header| Ok((header, self.open_null_file(name)?)));
        let ((key_serializer, key_size), null_file_id) = match opened {
            Ok(opened) => opened,
            Err(cause) => {
                if let Err(e) = cache.close_file(file_id, false) {
                    tracing::warn!(tree = %name, "failed to close rejected tree file: {e}");
                }
                return Err(cause);
            }
        };

        Ok(AttachedTree {
            name: name.to_string(),
            file_id,
            null_file_id,
            codec: EntryCodec::new(
                key_serializer,
                value_serializer,
                Arc::clone(&self.comparator),
            ),
            key_size,
            limits,
        })
    }

    fn read_root_header(cache: &dyn PageCache, file_id: FileId) -> Result<(u8, u8), TreeFailure> {
        if cache.filled_up_to(file_id)? == 0 {
            return Err(TreeFailure::Corrupted(
                "tree file has no root page".to_string(),
            ));
        }
        let root = PinnedPage::load(cache, file_id, ROOT_INDEX)?;
        let page = root.read();
        Ok((
            page.read_u8(KEY_SERIALIZER_OFFSET),
            page.read_u8(KEY_SIZE_OFFSET).max(1),
        ))
    }

    /// Detach from the tree file, optionally flushing dirty pages.
    ///
    /// Closing a detached tree does nothing.
    pub fn close(&self, flush: bool) -> Result<(), IndexError> {
        let mut state = self.state.exclusive();
        let Some(tree) = state.take() else {
            return Ok(());
        };

        let cache = self.cache.as_ref();
        cache
            .close_file(tree.file_id, flush)
            .and_then(|()| {
                tree.null_file_id
                    .map_or(Ok(()), |null_file_id| cache.close_file(null_file_id, flush))
            })
            .map_err(|e| IndexError::new(tree.name.as_str(), "close", e.into()))
    }

    /// Remove every entry, keeping the tree attached.
    pub fn clear(&self) -> Result<(), IndexError> {
        self.with_exclusive("clear", |tree| {
            let cache = self.cache.as_ref();
            cache.truncate_file(tree.file_id)?;
            if let Some(null_file_id) = tree.null_file_id {
                cache.truncate_file(null_file_id)?;
            }
            self.atomically("clear", |op| Self::init_root(op, tree))?;
            tracing::info!(tree = %tree.name, "cleared sbtree");
            Ok(())
        })
    }

    /// Delete the tree files and detach.
    pub fn delete(&self) -> Result<(), IndexError> {
        let mut state = self.state.exclusive();
        let tree = state.take().ok_or_else(|| {
            IndexError::new(DETACHED_TREE_NAME, "delete", TreeFailure::NotOpen)
        })?;

        let cache = self.cache.as_ref();
        cache
            .delete_file(tree.file_id)
            .and_then(|()| {
                tree.null_file_id
                    .map_or(Ok(()), |null_file_id| cache.delete_file(null_file_id))
            })
            .map_err(|e| IndexError::new(tree.name.as_str(), "delete", e.into()))?;
        tracing::info!(tree = %tree.name, "deleted sbtree");
        Ok(())
    }

    /// Delete the files of the tree stored under `name` without attaching.
    pub fn delete_without_load(&self, name: &str) -> Result<(), IndexError> {
        let state = self.state.exclusive();
        let fail = |cause| IndexError::new(name, "delete", cause);
        if state.as_ref().is_some_and(|tree| tree.name == name) {
            return Err(fail(TreeFailure::AlreadyOpen));
        }

        let cache = self.cache.as_ref();
        for file_name in [self.file_name(name), self.null_file_name(name)] {
            if cache.exists(&file_name) {
                let file_id = cache.open_file(&file_name).map_err(|e| fail(e.into()))?;
                cache.delete_file(file_id).map_err(|e| fail(e.into()))?;
            }
        }
        tracing::info!(tree = %name, "deleted sbtree without loading");
        Ok(())
    }

    /// Write dirty pages of the tree files back to storage.
    pub fn flush(&self) -> Result<(), IndexError> {
        self.with_shared("flush", |tree| {
            self.cache.flush_file(tree.file_id)?;
            if let Some(null_file_id) = tree.null_file_id {
                self.cache.flush_file(null_file_id)?;
            }
            Ok(())
        })
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, IndexError> {
        self.with_shared("get", |tree| {
            let cache = self.cache.as_ref();
            let search = self.find_bucket(tree, key)?;
            let Ok(index) = search.index else {
                return Ok(None);
            };
            let page = PinnedPage::load(cache, tree.file_id, leaf_page(&search)?)?;
            let stored = Bucket::new(&*page.read(), &tree.codec).get_value(index)?;
            tree.resolve(cache, &stored).map(Some)
        })
    }

    /// Insert `key`, replacing the value of an existing entry.
    pub fn put(&self, key: &K, value: &V) -> Result<(), IndexError> {
        self.with_exclusive("put", |tree| {
            let key_len = tree.codec.key_serializer().object_size(key);
            if key_len > tree.limits.max_key_size {
                return Err(TreeFailure::KeyTooLarge {
                    size: key_len,
                    max: tree.limits.max_key_size,
                });
            }
            self.atomically("put", |op| self.put_in(op, tree, key, value))
        })
    }

    fn put_in<'a>(
        &self,
        op: &mut AtomicOperation<'a>,
        tree: &AttachedTree<K, V>,
        key: &K,
        value: &V,
    ) -> Result<(), TreeFailure> {
        let cache = op.cache();
        let stored = Self::store_value(op, tree, value)?;
        let payload = tree.codec.encode_leaf_entry(key, &stored)?;
        if payload.len() > tree.limits.max_entry_size {
            return Err(TreeFailure::EntryTooLarge {
                size: payload.len(),
                max: tree.limits.max_entry_size,
            });
        }

        let mut search = self.find_bucket(tree, key)?;
        let mut page = PinnedPage::load(cache, tree.file_id, leaf_page(&search)?)?;

        let (mut insertion, grows) = match search.index {
            Ok(index) => {
                let previous = Bucket::new(&*page.read(), &tree.codec).get_value(index)?;
                let updated = op.modify(&page, |p| {
                    Ok(Bucket::new(p, &tree.codec).update_value(index, &stored)?)
                })?;
                if !updated {
                    op.modify(&page, |p| Ok(Bucket::new(p, &tree.codec).remove(index)?))?;
                }
                Self::free_value(op, tree, &previous)?;
                if updated {
                    return Ok(());
                }
                (index, false)
            }
            Err(insertion) => (insertion, true),
        };

        while !op.modify(&page, |p| {
            Ok(Bucket::new(p, &tree.codec).add_entry(insertion, &payload, true)?)
        })? {
            search = self.split_bucket(op, tree, &search.path, insertion, key)?;
            insertion = search.position();
            page = PinnedPage::load(cache, tree.file_id, leaf_page(&search)?)?;
        }

        if grows {
            Self::adjust_tree_size(op, tree, 1)?;
        }
        Ok(())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &K) -> Result<Option<V>, IndexError> {
        self.with_exclusive("remove", |tree| {
            self.atomically("remove", |op| {
                let cache = op.cache();
                let search = self.find_bucket(tree, key)?;
                let Ok(index) = search.index else {
                    return Ok(None);
                };
                let page = PinnedPage::load(cache, tree.file_id, leaf_page(&search)?)?;
                let stored = Bucket::new(&*page.read(), &tree.codec).get_value(index)?;
                let value = tree.resolve(cache, &stored)?;

                op.modify(&page, |p| Ok(Bucket::new(p, &tree.codec).remove(index)?))?;
                Self::free_value(op, tree, &stored)?;
                Self::adjust_tree_size(op, tree, -1)?;
                Ok(Some(value))
            })
        })
    }

    /// Number of entries, including the null key entry.
    pub fn size(&self) -> Result<u64, IndexError> {
        self.with_shared("size", |tree| {
            let root = PinnedPage::load(self.cache.as_ref(), tree.file_id, ROOT_INDEX)?;
            let size = Bucket::new(&*root.read(), &tree.codec).tree_size();
            Ok(size)
        })
    }

    fn store_value(
        op: &mut AtomicOperation<'_>,
        tree: &AttachedTree<K, V>,
        value: &V,
    ) -> Result<StoredValue<V>, TreeFailure> {
        let serializer = tree.codec.value_serializer();
        if !tree.codec.fixed_width_values()
            && serializer.object_size(value) > tree.limits.max_inline_value_size
        {
            let bytes = serializer.to_bytes(value)?;
            let first = value_page::write_chain(op, tree.file_id, &bytes)?;
            return Ok(StoredValue::Overflow(first));
        }
        Ok(StoredValue::Inline(value.clone()))
    }

    fn free_value(
        op: &mut AtomicOperation<'_>,
        tree: &AttachedTree<K, V>,
        stored: &StoredValue<V>,
    ) -> Result<(), TreeFailure> {
        if let Some(first) = stored.overflow_page() {
            value_page::free_chain(op, tree.file_id, first)?;
        }
        Ok(())
    }

    fn adjust_tree_size(
        op: &mut AtomicOperation<'_>,
        tree: &AttachedTree<K, V>,
        delta: i64,
    ) -> Result<(), TreeFailure> {
        let root = PinnedPage::load(op.cache(), tree.file_id, ROOT_INDEX)?;
        op.modify(&root, |p| {
            let mut root = Bucket::new(p, &tree.codec);
            let size = root
                .tree_size()
                .checked_add_signed(delta)
                .ok_or_else(|| TreeFailure::Corrupted("tree size out of range".to_string()))?;
            root.set_tree_size(size);
            Ok(())
        })
    }

    pub fn get_null(&self) -> Result<Option<V>, IndexError> {
        self.with_shared("get null", |tree| {
            let cache = self.cache.as_ref();
            let null_file_id = tree.null_file()?;
            if cache.filled_up_to(null_file_id)? == 0 {
                return Ok(None);
            }
            let page = PinnedPage::load(cache, null_file_id, 0)?;
            let stored = NullBucket::new(&*page.read(), &tree.codec).value()?;
            stored.map(|stored| tree.resolve(cache, &stored)).transpose()
        })
    }

    /// Store `value` under the null key.
    pub fn put_null(&self, value: &V) -> Result<(), IndexError> {
        self.with_exclusive("put null", |tree| {
            let null_file_id = tree.null_file()?;
            self.atomically("put null", |op| {
                let cache = op.cache();
                let page = if cache.filled_up_to(null_file_id)? == 0 {
                    PinnedPage::allocate(cache, null_file_id)?
                } else {
                    PinnedPage::load(cache, null_file_id, 0)?
                };
                let stored = Self::store_value(op, tree, value)?;
                let previous = NullBucket::new(&*page.read(), &tree.codec).value()?;
                op.modify(&page, |p| {
                    Ok(NullBucket::new(p, &tree.codec).set_value(&stored)?)
                })?;
                match previous {
                    Some(previous) => Self::free_value(op, tree, &previous),
                    None => Self::adjust_tree_size(op, tree, 1),
                }
            })
        })
    }

    /// Remove the null key entry, returning its value.
    pub fn remove_null(&self) -> Result<Option<V>, IndexError> {
        self.with_exclusive("remove null", |tree| {
            let null_file_id = tree.null_file()?;
            self.atomically("remove null", |op| {
                let cache = op.cache();
                if cache.filled_up_to(null_file_id)? == 0 {
                    return Ok(None);
                }
                let page = PinnedPage::load(cache, null_file_id, 0)?;
                let Some(stored) = NullBucket::new(&*page.read(), &tree.codec).value()? else {
                    return Ok(None);
                };
                let value = tree.resolve(cache, &stored)?;
                op.modify(&page, |p| {
                    NullBucket::new(p, &tree.codec).remove_value();
                    Ok(())
                })?;
                Self::free_value(op, tree, &stored)?;
                Self::adjust_tree_size(op, tree, -1)?;
                Ok(Some(value))
            })
        })
    }

    /// Values of keys below `key`, nearest first.
    pub fn get_values_minor(
        &self,
        key: &K,
        inclusive: bool,
        max_values: Option<usize>,
    ) -> Result<Vec<V>, IndexError> {
        self.get_entries_minor(key, inclusive, max_values)
            .map(into_values)
    }

    /// Values of keys above `key`, nearest first.
    pub fn get_values_major(
        &self,
        key: &K,
        inclusive: bool,
        max_values: Option<usize>,
    ) -> Result<Vec<V>, IndexError> {
        self.get_entries_major(key, inclusive, max_values)
            .map(into_values)
    }

    /// Values of keys between `from` and `to`, ascending.
    pub fn get_values_between(
        &self,
        from: &K,
        from_inclusive: bool,
        to: &K,
        to_inclusive: bool,
        max_values: Option<usize>,
    ) -> Result<Vec<V>, IndexError> {
        self.get_entries_between(from, from_inclusive, to, to_inclusive, max_values)
            .map(into_values)
    }

    pub fn get_entries_minor(
        &self,
        key: &K,
        inclusive: bool,
        max_entries: Option<usize>,
    ) -> Result<Vec<(K, V)>, IndexError> {
        self.fetch_range(
            "fetch of minor values",
            None,
            Some(RangeBound::new(key, inclusive)),
            false,
            max_entries,
        )
    }

    pub fn get_entries_major(
        &self,
        key: &K,
        inclusive: bool,
        max_entries: Option<usize>,
    ) -> Result<Vec<(K, V)>, IndexError> {
        self.fetch_range(
            "fetch of major values",
            Some(RangeBound::new(key, inclusive)),
            None,
            true,
            max_entries,
        )
    }

    pub fn get_entries_between(
        &self,
        from: &K,
        from_inclusive: bool,
        to: &K,
        to_inclusive: bool,
        max_entries: Option<usize>,
    ) -> Result<Vec<(K, V)>, IndexError> {
        self.fetch_range(
            "fetch of values between",
            Some(RangeBound::new(from, from_inclusive)),
            Some(RangeBound::new(to, to_inclusive)),
            true,
            max_entries,
        )
    }

    /// Smallest key, skipping empty leaves.
    pub fn first_key(&self) -> Result<Option<K>, IndexError> {
        self.fetch_range("first key", None, None, true, Some(1))
            .map(|entries| entries.into_iter().next().map(|(key, _)| key))
    }

    /// Largest key, skipping empty leaves.
    pub fn last_key(&self) -> Result<Option<K>, IndexError> {
        self.fetch_range("last key", None, None, false, Some(1))
            .map(|entries| entries.into_iter().next().map(|(key, _)| key))
    }

    /// Cursor over keys below `key`.
    #[must_use]
    pub fn iterate_entries_minor(
        &self,
        key: &K,
        inclusive: bool,
        ascending: bool,
    ) -> TreeCursor<'_, K, V> {
        TreeCursor::new(self, None, Some((key.clone(), inclusive)), ascending)
    }

    /// Cursor over keys above `key`.
    #[must_use]
    pub fn iterate_entries_major(
        &self,
        key: &K,
        inclusive: bool,
        ascending: bool,
    ) -> TreeCursor<'_, K, V> {
        TreeCursor::new(self, Some((key.clone(), inclusive)), None, ascending)
    }

    /// Cursor over keys between `from` and `to`.
    #[must_use]
    pub fn iterate_entries_between(
        &self,
        from: &K,
        from_inclusive: bool,
        to: &K,
        to_inclusive: bool,
        ascending: bool,
    ) -> TreeCursor<'_, K, V> {
        TreeCursor::new(
            self,
            Some((from.clone(), from_inclusive)),
            Some((to.clone(), to_inclusive)),
            ascending,
        )
    }

    /// Cursor over every key in ascending order.
    #[must_use]
    pub fn key_cursor(&self) -> KeyCursor<'_, K, V> {
        KeyCursor::new(TreeCursor::new(self, None, None, true))
    }

    /// Entries within the bounds, walking right when `ascending` and left
    /// otherwise, stopping after `limit` entries.
    pub(crate) fn fetch_range(
        &self,
        operation: &str,
        lower: Option<RangeBound<'_, K>>,
        upper: Option<RangeBound<'_, K>>,
        ascending: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(K, V)>, IndexError> {
        self.with_shared(operation, |tree| {
            self.collect_range(tree, lower, upper, ascending, limit)
        })
    }

    fn collect_range(
        &self,
        tree: &AttachedTree<K, V>,
        lower: Option<RangeBound<'_, K>>,
        upper: Option<RangeBound<'_, K>>,
        ascending: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(K, V)>, TreeFailure> {
        let mut out = Vec::new();
        if limit == Some(0) {
            return Ok(out);
        }

        let lower = lower.map(|bound| {
            let mode = if bound.inclusive {
                PartialSearchMode::LowestBoundary
            } else {
                PartialSearchMode::HighestBoundary
            };
            (tree.search_key(bound.key, mode), bound.inclusive)
        });
        let upper = upper.map(|bound| {
            let mode = if bound.inclusive {
                PartialSearchMode::HighestBoundary
            } else {
                PartialSearchMode::LowestBoundary
            };
            (tree.search_key(bound.key, mode), bound.inclusive)
        });
        if let (Some((low, _)), Some((high, _))) = (&lower, &upper) {
            if tree.codec.compare(low, high) == Ordering::Greater {
                return Ok(out);
            }
        }

        // First index at or after the lower bound.
        let lower = match &lower {
            Some((key, inclusive)) => {
                let search = self.find_bucket(tree, key)?;
                let index = match search.index {
                    Ok(found) if *inclusive => found,
                    Ok(found) => found + 1,
                    Err(insertion) => insertion,
                };
                Some((leaf_page(&search)?, index))
            }
            None => None,
        };
        // Last index at or before the upper bound.
        let upper = match &upper {
            Some((key, inclusive)) => {
                let search = self.find_bucket(tree, key)?;
                let index = match search.index {
                    Ok(found) if *inclusive => Some(found),
                    Ok(found) | Err(found) => found.checked_sub(1),
                };
                Some((leaf_page(&search)?, index))
            }
            None => None,
        };

        let cache = self.cache.as_ref();
        let page_budget = cache.filled_up_to(tree.file_id)?;
        let mut visited = 0u64;

        if ascending {
            let (mut page_index, mut start) = match lower {
                Some(position) => position,
                None => (self.edge_leaf(tree, false)?, 0),
            };
            loop {
                visited += 1;
                check_chain_length(visited, page_budget)?;

                let page = PinnedPage::load(cache, tree.file_id, page_index)?;
                let guard = page.read();
                let bucket = Bucket::new(&*guard, &tree.codec);
                let last_page = upper.is_some_and(|(end_page, _)| end_page == page_index);
                let end = if last_page {
                    upper.and_then(|(_, end)| end)
                } else {
                    bucket.size().checked_sub(1)
                };

                if let Some(end) = end {
                    for index in start..=end {
                        out.push(read_entry(cache, tree, &bucket, index)?);
                        if Some(out.len()) == limit {
                            return Ok(out);
                        }
                    }
                }

                match bucket.right_sibling() {
                    Some(next) if !last_page => {
                        page_index = next;
                        start = 0;
                    }
                    _ => return Ok(out),
                }
            }
        } else {
            let (mut page_index, mut first_from) = match upper {
                Some((page, end)) => (page, Some(end)),
                None => (self.edge_leaf(tree, true)?, None),
            };
            loop {
                visited += 1;
                check_chain_length(visited, page_budget)?;

                let page = PinnedPage::load(cache, tree.file_id, page_index)?;
                let guard = page.read();
                let bucket = Bucket::new(&*guard, &tree.codec);
                let last_page = lower.is_some_and(|(end_page, _)| end_page == page_index);
                let low = lower
                    .filter(|_| last_page)
                    .map_or(0, |(_, start)| start);
                let from = first_from
                    .take()
                    .unwrap_or_else(|| bucket.size().checked_sub(1));

                if let Some(from) = from {
                    for index in (low..=from).rev() {
                        out.push(read_entry(cache, tree, &bucket, index)?);
                        if Some(out.len()) == limit {
                            return Ok(out);
                        }
                    }
                }

                match bucket.left_sibling() {
                    Some(next) if !last_page => page_index = next,
                    _ => return Ok(out),
                }
            }
        }
    }

    /// Leftmost or rightmost leaf.
    fn edge_leaf(&self, tree: &AttachedTree<K, V>, rightmost: bool) -> Result<PageIndex, TreeFailure> {
        let cache = self.cache.as_ref();
        let mut page_index = ROOT_INDEX;
        for _ in 0..self.config.max_path_length {
            let page = PinnedPage::load(cache, tree.file_id, page_index)?;
            let guard = page.read();
            let bucket = Bucket::new(&*guard, &tree.codec);
            if bucket.is_leaf() {
                return Ok(page_index);
            }
            page_index = if rightmost {
                let last = bucket
                    .size()
                    .checked_sub(1)
                    .ok_or_else(|| empty_internal_bucket(page_index))?;
                bucket.right_child(last)?
            } else {
                bucket.left_child(0)?
            };
        }
        Err(self.path_too_long())
    }

    /// Descend from the root to the leaf that holds or would hold `key`.
    fn find_bucket(&self, tree: &AttachedTree<K, V>, key: &K) -> Result<BucketSearchResult, TreeFailure> {
        let cache = self.cache.as_ref();
        let mut path = Vec::new();
        let mut page_index = ROOT_INDEX;

        loop {
            if path.len() >= self.config.max_path_length {
                return Err(self.path_too_long());
            }
            path.push(page_index);

            let page = PinnedPage::load(cache, tree.file_id, page_index)?;
            let guard = page.read();
            let bucket = Bucket::new(&*guard, &tree.codec);
            let found = bucket.find(key)?;
            if bucket.is_leaf() {
                return Ok(BucketSearchResult::new(found, path));
            }

            let last = bucket
                .size()
                .checked_sub(1)
                .ok_or_else(|| empty_internal_bucket(page_index))?;
            let entry_index = match found {
                Ok(index) => index,
                Err(insertion) => insertion.min(last),
            };
            let separator = bucket.get_key(entry_index)?;
            page_index = if tree.codec.compare(key, &separator) == Ordering::Less {
                bucket.left_child(entry_index)?
            } else {
                bucket.right_child(entry_index)?
            };
        }
    }

    fn path_too_long(&self) -> TreeFailure {
        TreeFailure::Corrupted(format!(
            "descent exceeded {} levels",
            self.config.max_path_length
        ))
    }

    /// Split the last bucket of `path` and return where `key` now belongs.
    ///
    /// `key_index` is the insertion index of `key` in the bucket being
    /// split; the returned result carries the corrected path and index.
    fn split_bucket<'a>(
        &self,
        op: &mut AtomicOperation<'a>,
        tree: &AttachedTree<K, V>,
        path: &[PageIndex],
        key_index: usize,
        key: &K,
    ) -> Result<BucketSearchResult, TreeFailure> {
        let (&page_index, parent_path) = path.split_last().ok_or_else(|| {
            TreeFailure::Corrupted("split requested for an empty path".to_string())
        })?;
        let page = PinnedPage::load(op.cache(), tree.file_id, page_index)?;
        let plan = Self::plan_split(&page, tree, page_index == ROOT_INDEX)?;

        let (mut result_path, left_index, right_index) = if page_index == ROOT_INDEX {
            let (left, right) = Self::split_root(op, tree, &page, &plan)?;
            (path.to_vec(), left, right)
        } else {
            let right = Self::split_non_root(op, tree, &page, &plan)?;
            drop(page);
            let parent_path =
                self.insert_separator(op, tree, parent_path, page_index, right, &plan.separator)?;
            (parent_path, page_index, right)
        };

        if tree.codec.compare(key, &plan.separator) == Ordering::Less {
            result_path.push(left_index);
            return Ok(BucketSearchResult::new(Err(key_index), result_path));
        }

        result_path.push(right_index);
        let moved = plan.index_to_split + usize::from(!plan.is_leaf);
        let index = key_index.checked_sub(moved).ok_or_else(|| {
            TreeFailure::Corrupted(format!(
                "insertion index {key_index} precedes split point {moved} of bucket {page_index}"
            ))
        })?;
        Ok(BucketSearchResult::new(Err(index), result_path))
    }

    fn plan_split(
        page: &PinnedPage<'_>,
        tree: &AttachedTree<K, V>,
        keep_left_entries: bool,
    ) -> Result<SplitPlan<K>, TreeFailure> {
        let guard = page.read();
        let bucket = Bucket::new(&*guard, &tree.codec);
        let size = bucket.size();
        if size < 2 {
            return Err(TreeFailure::Corrupted(format!(
                "bucket {} with {size} entries cannot be split",
                page.page_index()
            )));
        }

        let is_leaf = bucket.is_leaf();
        let index_to_split = size >> 1;
        let right_start = if is_leaf {
            index_to_split
        } else {
            index_to_split + 1
        };
        let raw = |range: std::ops::Range<usize>| {
            range
                .map(|index| bucket.get_raw_entry(index))
                .collect::<Result<Vec<_>, BucketError>>()
        };

        Ok(SplitPlan {
            is_leaf,
            index_to_split,
            separator: bucket.get_key(index_to_split)?,
            left_entries: if keep_left_entries {
                raw(0..index_to_split)?
            } else {
                Vec::new()
            },
            right_entries: raw(right_start..size)?,
            right_sibling: bucket.right_sibling(),
        })
    }

    /// Move the right half of `page` to a new bucket; returns its index.
    fn split_non_root<'a>(
        op: &mut AtomicOperation<'a>,
        tree: &AttachedTree<K, V>,
        page: &PinnedPage<'a>,
        plan: &SplitPlan<K>,
    ) -> Result<PageIndex, TreeFailure> {
        let cache = op.cache();
        let page_index = page.page_index();
        let right = PinnedPage::allocate(cache, tree.file_id)?;
        let right_index = right.page_index();

        op.modify(&right, |p| {
            let mut bucket = Bucket::init(p, &tree.codec, plan.is_leaf);
            bucket.add_all(&plan.right_entries)?;
            if plan.is_leaf {
                bucket.set_left_sibling(Some(page_index));
                bucket.set_right_sibling(plan.right_sibling);
            }
            Ok(())
        })?;
        op.modify(page, |p| {
            let mut bucket = Bucket::new(p, &tree.codec);
            bucket.shrink(plan.index_to_split)?;
            if plan.is_leaf {
                bucket.set_right_sibling(Some(right_index));
            }
            Ok(())
        })?;

        if plan.is_leaf {
            if let Some(sibling_index) = plan.right_sibling {
                let sibling = PinnedPage::load(cache, tree.file_id, sibling_index)?;
                op.modify(&sibling, |p| {
                    Bucket::new(p, &tree.codec).set_left_sibling(Some(right_index));
                    Ok(())
                })?;
            }
        }

        tracing::debug!(
            tree = %tree.name,
            page = page_index,
            new_page = right_index,
            leaf = plan.is_leaf,
            "split bucket"
        );
        Ok(right_index)
    }

    /// Insert the separator of a split into the parent bucket, splitting the
    /// parent as often as needed. Returns the path to the bucket that
    /// received the separator.
    fn insert_separator<'a>(
        &self,
        op: &mut AtomicOperation<'a>,
        tree: &AttachedTree<K, V>,
        parent_path: &[PageIndex],
        left: PageIndex,
        right: PageIndex,
        separator: &K,
    ) -> Result<Vec<PageIndex>, TreeFailure> {
        let cache = op.cache();
        let entry = tree.codec.encode_internal_entry(left, right, separator)?;
        let mut path = parent_path.to_vec();
        let parent_index = *path.last().ok_or_else(|| {
            TreeFailure::Corrupted(format!("bucket {left} has no parent"))
        })?;
        let mut parent = PinnedPage::load(cache, tree.file_id, parent_index)?;

        let found = Bucket::new(&*parent.read(), &tree.codec).find(separator)?;
        let mut insertion = match found {
            Ok(_) => {
                return Err(TreeFailure::Corrupted(format!(
                    "separator already present in bucket {parent_index}"
                )));
            }
            Err(insertion) => insertion,
        };

        while !op.modify(&parent, |p| {
            Ok(Bucket::new(p, &tree.codec).add_entry(insertion, &entry, true)?)
        })? {
            let result = self.split_bucket(op, tree, &path, insertion, separator)?;
            insertion = result.position();
            parent = PinnedPage::load(cache, tree.file_id, leaf_page(&result)?)?;
            path = result.path;
        }
        Ok(path)
    }

    /// Split the root into two new children; page 0 becomes an internal
    /// bucket with one entry. Returns the (left, right) children.
    fn split_root<'a>(
        op: &mut AtomicOperation<'a>,
        tree: &AttachedTree<K, V>,
        root: &PinnedPage<'a>,
        plan: &SplitPlan<K>,
    ) -> Result<(PageIndex, PageIndex), TreeFailure> {
        let cache = op.cache();
        let left = PinnedPage::allocate(cache, tree.file_id)?;
        let right = PinnedPage::allocate(cache, tree.file_id)?;
        let (left_index, right_index) = (left.page_index(), right.page_index());

        op.modify(&left, |p| {
            let mut bucket = Bucket::init(p, &tree.codec, plan.is_leaf);
            bucket.add_all(&plan.left_entries)?;
            if plan.is_leaf {
                bucket.set_right_sibling(Some(right_index));
            }
            Ok(())
        })?;
        op.modify(&right, |p| {
            let mut bucket = Bucket::init(p, &tree.codec, plan.is_leaf);
            bucket.add_all(&plan.right_entries)?;
            if plan.is_leaf {
                bucket.set_left_sibling(Some(left_index));
            }
            Ok(())
        })?;

        let entry = tree
            .codec
            .encode_internal_entry(left_index, right_index, &plan.separator)?;
        op.modify(root, |p| {
            let mut bucket = Bucket::init(p, &tree.codec, false);
            if bucket.add_entry(0, &entry, true)? {
                Ok(())
            } else {
                Err(BucketError::EntryDoesNotFit.into())
            }
        })?;

        tracing::debug!(
            tree = %tree.name,
            left = left_index,
            right = right_index,
            "split root, tree grew one level"
        );
        Ok((left_index, right_index))
    }
}

fn leaf_page(search: &BucketSearchResult) -> Result<PageIndex, TreeFailure> {
    search
        .last_page()
        .ok_or_else(|| TreeFailure::Corrupted("empty search path".to_string()))
}

fn empty_internal_bucket(page_index: PageIndex) -> TreeFailure {
    TreeFailure::Corrupted(format!("internal bucket {page_index} is empty"))
}

fn check_chain_length(visited: u64, page_budget: u64) -> Result<(), TreeFailure> {
    if visited > page_budget {
        return Err(TreeFailure::Corrupted(
            "leaf sibling chain does not terminate".to_string(),
        ));
    }
    Ok(())
}

fn read_entry<K: IndexKey, V: Clone, P: Deref<Target = Page>>(
    cache: &dyn PageCache,
    tree: &AttachedTree<K, V>,
    bucket: &Bucket<'_, P, K, V>,
    index: usize,
) -> Result<(K, V), TreeFailure> {
    match bucket.get_entry(index)? {
        BucketEntry::Leaf { key, value } => Ok((key, tree.resolve(cache, &value)?)),
        BucketEntry::Internal { .. } => Err(TreeFailure::Corrupted(
            "leaf sibling chain reached an internal bucket".to_string(),
        )),
    }
}

fn into_values<K, V>(entries: Vec<(K, V)>) -> Vec<V> {
    entries.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{LongSerializer, SerializerError, StringSerializer};
    use crate::testing::{TestStorage, fill, value_for};

    /// `LongSerializer` under a different id.
    struct RetaggedLong;

    impl BinarySerializer<i64> for RetaggedLong {
        fn id(&self) -> u8 {
            99
        }

        fn object_size(&self, value: &i64) -> usize {
            LongSerializer.object_size(value)
        }

        fn object_size_in(&self, buf: &[u8]) -> Result<usize, SerializerError> {
            LongSerializer.object_size_in(buf)
        }

        fn serialize_native(&self, value: &i64, out: &mut Vec<u8>) -> Result<(), SerializerError> {
            LongSerializer.serialize_native(value, out)
        }

        fn deserialize_native(&self, buf: &[u8]) -> Result<i64, SerializerError> {
            LongSerializer.deserialize_native(buf)
        }

        fn fixed_length(&self) -> Option<usize> {
            Some(8)
        }
    }

    #[test]
    fn test_put_get_remove() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("basic");

        tree.put(&5, &"five".to_string()).expect("put");
        tree.put(&3, &"three".to_string()).expect("put");
        assert_eq!(tree.get(&5).expect("get"), Some("five".to_string()));
        assert_eq!(tree.get(&4).expect("get"), None);
        assert_eq!(tree.size().expect("size"), 2);

        assert_eq!(tree.remove(&5).expect("remove"), Some("five".to_string()));
        assert_eq!(tree.remove(&5).expect("remove"), None);
        assert_eq!(tree.get(&5).expect("get"), None);
        assert_eq!(tree.size().expect("size"), 1);
        assert_eq!(storage.pinned_pages(), 0);
    }

    #[test]
    fn test_put_replaces_existing_value() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("replace");

        tree.put(&1, &"a".to_string()).expect("put");
        tree.put(&1, &"b".to_string()).expect("same size update");
        tree.put(&1, &"longer".to_string()).expect("resized update");
        assert_eq!(tree.get(&1).expect("get"), Some("longer".to_string()));
        assert_eq!(tree.size().expect("size"), 1);
    }

    #[test]
    fn test_value_moves_to_overflow_and_back() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("overflow");
        let big = "x".repeat(600);

        fill(&tree, 0..5);
        tree.put(&2, &big).expect("put large value");
        assert_eq!(tree.get(&2).expect("get"), Some(big.clone()));
        assert_eq!(tree.size().expect("size"), 5);

        tree.put(&2, &"small".to_string()).expect("shrink value");
        assert_eq!(tree.get(&2).expect("get"), Some("small".to_string()));
        assert_eq!(tree.remove(&2).expect("remove"), Some("small".to_string()));

        tree.put(&3, &big).expect("put large value");
        assert_eq!(tree.remove(&3).expect("remove"), Some(big));
        assert_eq!(tree.size().expect("size"), 3);
        assert_eq!(storage.pinned_pages(), 0);
    }

    #[test]
    fn test_descending_inserts_grow_the_tree() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("grow");

        fill(&tree, (0..300).rev());
        assert_eq!(tree.size().expect("size"), 300);
        for key in 0..300 {
            assert_eq!(tree.get(&key).expect("get"), Some(value_for(key)));
        }

        let keys: Vec<i64> = tree
            .key_cursor()
            .collect::<Result<_, _>>()
            .expect("iterate keys");
        assert_eq!(keys, (0..300).collect::<Vec<_>>());
        assert_eq!(tree.first_key().expect("first"), Some(0));
        assert_eq!(tree.last_key().expect("last"), Some(299));
        assert_eq!(storage.pinned_pages(), 0);
    }

    /// Keys, leaf flag and sibling links of one page of an attached tree.
    struct PageView {
        is_leaf: bool,
        keys: Vec<i64>,
        left_sibling: Option<PageIndex>,
        right_sibling: Option<PageIndex>,
    }

    fn view_page(tree: &SBTree<i64, String>, page_index: PageIndex) -> PageView {
        tree.with_shared("inspect", |attached| {
            let page = PinnedPage::load(tree.cache.as_ref(), attached.file_id, page_index)?;
            let guard = page.read();
            let bucket = Bucket::new(&*guard, &attached.codec);
            let keys = (0..bucket.size())
                .map(|index| bucket.get_key(index))
                .collect::<Result<_, _>>()?;
            Ok(PageView {
                is_leaf: bucket.is_leaf(),
                keys,
                left_sibling: bucket.left_sibling(),
                right_sibling: bucket.right_sibling(),
            })
        })
        .expect("inspect page")
    }

    fn root_children(tree: &SBTree<i64, String>) -> (PageIndex, PageIndex) {
        tree.with_shared("inspect", |attached| {
            let root = PinnedPage::load(tree.cache.as_ref(), attached.file_id, ROOT_INDEX)?;
            let guard = root.read();
            let bucket = Bucket::new(&*guard, &attached.codec);
            Ok((bucket.left_child(0)?, bucket.right_child(0)?))
        })
        .expect("inspect root")
    }

    #[test]
    fn test_first_root_split() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("root-split");

        let mut inserted = 0;
        while view_page(&tree, ROOT_INDEX).is_leaf {
            assert!(inserted < 100, "root never split");
            tree.put(&inserted, &value_for(inserted)).expect("put");
            inserted += 1;
        }

        let root = view_page(&tree, ROOT_INDEX);
        assert_eq!(root.keys.len(), 1);
        let separator = root.keys[0];

        let (left_index, right_index) = root_children(&tree);
        assert_ne!(left_index, ROOT_INDEX);
        assert_ne!(right_index, ROOT_INDEX);
        let left = view_page(&tree, left_index);
        let right = view_page(&tree, right_index);
        assert!(left.is_leaf);
        assert!(right.is_leaf);
        assert!(!left.keys.is_empty());
        assert!(left.keys.iter().all(|key| *key < separator));
        assert!(right.keys.iter().all(|key| *key >= separator));
        assert_eq!(left.keys.len() + right.keys.len(), usize::try_from(inserted).expect("count"));

        assert_eq!(left.left_sibling, None);
        assert_eq!(left.right_sibling, Some(right_index));
        assert_eq!(right.left_sibling, Some(left_index));
        assert_eq!(right.right_sibling, None);
    }

    #[test]
    fn test_leaf_sibling_chain_links_every_leaf() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("chain");
        fill(&tree, (0..1500).map(|key| (key * 7919) % 1500));

        let (first, last, depth) = tree
            .with_shared("inspect", |attached| {
                let depth = tree.find_bucket(attached, &0)?.parent_path().len() + 1;
                Ok((tree.edge_leaf(attached, false)?, tree.edge_leaf(attached, true)?, depth))
            })
            .expect("edges");
        assert!(depth >= 3, "expected a multi-level tree, got depth {depth}");

        let mut forward = Vec::new();
        let mut keys = Vec::new();
        let mut next = Some(first);
        while let Some(page_index) = next {
            assert!(!forward.contains(&page_index), "leaf {page_index} visited twice");
            let leaf = view_page(&tree, page_index);
            assert!(leaf.is_leaf);
            keys.extend(leaf.keys);
            forward.push(page_index);
            next = leaf.right_sibling;
        }
        assert_eq!(forward.last(), Some(&last));
        assert_eq!(keys, (0..1500).collect::<Vec<_>>());

        let mut backward = Vec::new();
        let mut previous = Some(last);
        while let Some(page_index) = previous {
            assert!(backward.len() < forward.len(), "left chain longer than right chain");
            backward.push(page_index);
            previous = view_page(&tree, page_index).left_sibling;
        }
        backward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn test_page_size_below_minimum_is_rejected() {
        let config = TreeConfig::default();
        assert!(matches!(
            Limits::new(&config, 32),
            Err(TreeFailure::Cache(CacheError::InvalidPageSize(32)))
        ));
        let limits = Limits::new(&config, MIN_PAGE_SIZE).expect("minimum page size");
        assert!(limits.max_key_size > 0);
        assert!(limits.max_entry_size >= limits.max_key_size);
    }

    #[test]
    fn test_failed_null_file_open_closes_tree_file() {
        let storage = TestStorage::small();
        let config = TreeConfig::default().with_null_key_support(true);
        let tree: SBTree<i64, String> = storage.tree(config);
        tree.create("half-open", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
            .expect("create");
        fill(&tree, 0..10);
        tree.close(true).expect("close");
        assert_eq!(storage.cache.open_files(), 0);

        // Opening the tree file and loading its root succeed; the null file open fails.
        storage.cache.fail_after(2);
        let err = tree
            .open("half-open", Arc::new(LongSerializer), Arc::new(StringSerializer))
            .expect_err("null file open fails");
        storage.cache.clear_countdown();
        assert!(matches!(
            err.cause,
            TreeFailure::Cache(CacheError::InjectedFault(_))
        ));
        assert!(!tree.is_open());
        assert_eq!(storage.cache.open_files(), 0);
        assert_eq!(storage.pinned_pages(), 0);

        tree.open("half-open", Arc::new(LongSerializer), Arc::new(StringSerializer))
            .expect("open");
        assert_eq!(tree.size().expect("size"), 10);
    }

    #[test]
    fn test_empty_tree_edges() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("empty");

        assert_eq!(tree.size().expect("size"), 0);
        assert_eq!(tree.first_key().expect("first"), None);
        assert_eq!(tree.last_key().expect("last"), None);
        assert!(tree.get_values_major(&0, true, None).expect("major").is_empty());
        assert_eq!(tree.key_cursor().count(), 0);
    }

    #[test]
    fn test_key_too_large_is_rejected() {
        let storage = TestStorage::small();
        let tree: SBTree<String, String> = storage.tree(TreeConfig::default());
        tree.create("keys", Arc::new(StringSerializer), Arc::new(StringSerializer), 1)
            .expect("create");

        let err = tree
            .put(&"k".repeat(100), &"v".to_string())
            .expect_err("key must be rejected");
        assert_eq!(err.tree, "keys");
        assert_eq!(err.operation, "put");
        assert!(matches!(err.cause, TreeFailure::KeyTooLarge { size: 104, .. }));
        assert_eq!(tree.size().expect("size"), 0);
    }

    #[test]
    fn test_detached_tree_reports_not_open() {
        let storage = TestStorage::small();
        let tree: SBTree<i64, String> = storage.tree(TreeConfig::default());

        let err = tree.get(&1).expect_err("detached");
        assert_eq!(err.tree, DETACHED_TREE_NAME);
        assert!(matches!(err.cause, TreeFailure::NotOpen));
        assert!(matches!(
            tree.delete().expect_err("detached").cause,
            TreeFailure::NotOpen
        ));
        tree.close(true).expect("closing a detached tree is a no-op");
    }

    #[test]
    fn test_create_validates_state_and_key_size() {
        let storage = TestStorage::small();
        let tree: SBTree<i64, String> = storage.tree(TreeConfig::default());

        let err = tree
            .create("bad", Arc::new(LongSerializer), Arc::new(StringSerializer), 0)
            .expect_err("zero key size");
        assert!(matches!(err.cause, TreeFailure::InvalidKeySize(0)));
        assert!(!tree.is_open());

        tree.create("good", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
            .expect("create");
        let err = tree
            .create("other", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
            .expect_err("already open");
        assert!(matches!(err.cause, TreeFailure::AlreadyOpen));
        assert_eq!(tree.name(), Some("good".to_string()));
        assert_eq!(tree.key_size(), Some(1));
    }

    #[test]
    fn test_open_checks_key_serializer() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("checked");
        fill(&tree, 0..20);
        tree.close(true).expect("close");

        let err = tree
            .open("checked", Arc::new(RetaggedLong), Arc::new(StringSerializer))
            .expect_err("mismatch");
        assert!(matches!(
            err.cause,
            TreeFailure::SerializerMismatch {
                expected: 99,
                found: LongSerializer::ID
            }
        ));
        assert!(!tree.is_open());

        tree.open("checked", Arc::new(LongSerializer), Arc::new(StringSerializer))
            .expect("open");
        assert_eq!(tree.size().expect("size"), 20);
        assert_eq!(tree.get(&7).expect("get"), Some(value_for(7)));
    }

    #[test]
    fn test_load_resolves_serializer_by_id() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("registry");
        fill(&tree, 0..10);
        tree.close(true).expect("close");

        let empty = SerializerRegistry::<i64>::new();
        let err = tree
            .load("registry", &empty, Arc::new(StringSerializer))
            .expect_err("unknown id");
        assert!(matches!(
            err.cause,
            TreeFailure::Serializer(SerializerError::UnknownSerializer(LongSerializer::ID))
        ));

        let registry = SerializerRegistry::<i64>::new().with(Arc::new(LongSerializer));
        tree.load("registry", &registry, Arc::new(StringSerializer))
            .expect("load");
        assert_eq!(tree.last_key().expect("last"), Some(9));
    }

    #[test]
    fn test_open_missing_tree() {
        let storage = TestStorage::small();
        let tree: SBTree<i64, String> = storage.tree(TreeConfig::default());
        let err = tree
            .open("missing", Arc::new(LongSerializer), Arc::new(StringSerializer))
            .expect_err("missing");
        assert!(matches!(err.cause, TreeFailure::TreeNotFound(ref file) if file == "missing.sbt"));
    }

    #[test]
    fn test_clear_keeps_tree_usable() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("clear");
        fill(&tree, 0..100);

        tree.clear().expect("clear");
        assert_eq!(tree.size().expect("size"), 0);
        assert_eq!(tree.get(&50).expect("get"), None);
        assert_eq!(tree.key_size(), Some(1));

        fill(&tree, 0..3);
        assert_eq!(tree.size().expect("size"), 3);
    }

    #[test]
    fn test_delete_and_delete_without_load() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("doomed");
        fill(&tree, 0..10);
        tree.delete().expect("delete");
        assert!(!tree.is_open());
        assert!(!storage.cache.exists("doomed.sbt"));

        let other = storage.long_tree("later");
        let err = other
            .delete_without_load("later")
            .expect_err("attached tree cannot be deleted by name");
        assert!(matches!(err.cause, TreeFailure::AlreadyOpen));
        other.close(true).expect("close");

        other.delete_without_load("later").expect("delete by name");
        assert!(!storage.cache.exists("later.sbt"));
        other
            .delete_without_load("never-existed")
            .expect("deleting nothing succeeds");
    }

    #[test]
    fn test_null_key() {
        let storage = TestStorage::small();
        let tree: SBTree<i64, String> =
            storage.tree(TreeConfig::default().with_null_key_support(true));
        tree.create("nullable", Arc::new(LongSerializer), Arc::new(StringSerializer), 1)
            .expect("create");
        fill(&tree, 0..3);

        assert_eq!(tree.get_null().expect("get null"), None);
        tree.put_null(&"nothing".to_string()).expect("put null");
        tree.put_null(&"still nothing".to_string()).expect("replace null");
        assert_eq!(
            tree.get_null().expect("get null"),
            Some("still nothing".to_string())
        );
        assert_eq!(tree.size().expect("size"), 4);

        let big = "n".repeat(500);
        tree.put_null(&big).expect("put large null");
        assert_eq!(tree.get_null().expect("get null"), Some(big.clone()));

        assert_eq!(tree.remove_null().expect("remove null"), Some(big));
        assert_eq!(tree.remove_null().expect("remove null"), None);
        assert_eq!(tree.size().expect("size"), 3);
    }

    #[test]
    fn test_null_key_without_support() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("strict");
        let err = tree.put_null(&"x".to_string()).expect_err("unsupported");
        assert!(matches!(err.cause, TreeFailure::NullKeysNotSupported));
        assert!(matches!(
            tree.get_null().expect_err("unsupported").cause,
            TreeFailure::NullKeysNotSupported
        ));
    }

    #[test]
    fn test_every_mutation_is_bracketed() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("wal");
        let before = storage.wal.committed_operations();

        fill(&tree, 0..50);
        tree.remove(&10).expect("remove");
        assert_eq!(storage.wal.committed_operations(), before + 51);
        assert_eq!(storage.wal.active_operations(), 0);
    }

    #[test]
    fn test_failed_log_leaves_tree_unchanged() {
        let storage = TestStorage::small();
        let tree = storage.long_tree("logfail");
        fill(&tree, 0..30);

        storage.wal.fail_next_log();
        let err = tree.put(&100, &value_for(100)).expect_err("log fails");
        assert!(matches!(err.cause, TreeFailure::Wal(_)));
        assert_eq!(tree.get(&100).expect("get"), None);
        assert_eq!(tree.size().expect("size"), 30);
        assert_eq!(storage.pinned_pages(), 0);
    }
}
