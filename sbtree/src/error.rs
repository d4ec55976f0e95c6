//! Errors surfaced by tree operations.
//!
//! Internal layers have their own error enums. They are collected into
//! `TreeFailure`, and every public operation wraps the failure in an
//! `IndexError` naming the tree and the operation that failed.

use crate::serialization::SerializerError;
use crate::storage::btree::bucket::BucketError;
use crate::storage::cache::CacheError;
use crate::storage::wal::WalError;

/// Name reported for operations on a tree that is not attached to a file.
pub const DETACHED_TREE_NAME: &str = "(detached)";

/// The error returned by every public tree operation.
#[derive(Debug)]
pub struct IndexError {
    pub tree: String,
    pub operation: String,
    pub cause: TreeFailure,
}

impl IndexError {
    #[must_use]
    pub fn new(tree: impl Into<String>, operation: impl Into<String>, cause: TreeFailure) -> Self {
        Self {
            tree: tree.into(),
            operation: operation.into(),
            cause,
        }
    }
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "error during {} in sbtree '{}': {}",
            self.operation, self.tree, self.cause
        )
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// What went wrong inside a tree operation.
#[derive(Debug)]
pub enum TreeFailure {
    Cache(CacheError),
    Wal(WalError),
    Serializer(SerializerError),
    Bucket(BucketError),
    /// A serialized key exceeds the effective key size limit.
    KeyTooLarge { size: usize, max: usize },
    /// An encoded leaf entry does not fit the bucket entry limit.
    EntryTooLarge { size: usize, max: usize },
    /// Composite key arity outside `1..=255`.
    InvalidKeySize(usize),
    /// Null keys were used on a tree created without null key support.
    NullKeysNotSupported,
    /// The tree is not attached to a file.
    NotOpen,
    /// The tree is already attached to a file.
    AlreadyOpen,
    /// The persisted key serializer differs from the one supplied.
    SerializerMismatch { expected: u8, found: u8 },
    /// No tree file exists under this name.
    TreeNotFound(String),
    /// The on-disk structure violates a tree invariant.
    Corrupted(String),
}

impl std::fmt::Display for TreeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache(e) => write!(f, "page cache error: {e}"),
            Self::Wal(e) => write!(f, "durability error: {e}"),
            Self::Serializer(e) => write!(f, "serializer error: {e}"),
            Self::Bucket(e) => write!(f, "bucket error: {e}"),
            Self::KeyTooLarge { size, max } => {
                write!(f, "key size {size} exceeds the allowed {max} bytes")
            }
            Self::EntryTooLarge { size, max } => {
                write!(f, "entry size {size} exceeds the allowed {max} bytes")
            }
            Self::InvalidKeySize(size) => write!(f, "invalid key size: {size}"),
            Self::NullKeysNotSupported => write!(f, "null keys are not supported"),
            Self::NotOpen => write!(f, "tree is not open"),
            Self::AlreadyOpen => write!(f, "tree is already open"),
            Self::SerializerMismatch { expected, found } => write!(
                f,
                "key serializer mismatch: expected id {expected}, found {found}"
            ),
            Self::TreeNotFound(name) => write!(f, "tree file not found: {name}"),
            Self::Corrupted(msg) => write!(f, "tree is corrupted: {msg}"),
        }
    }
}

impl std::error::Error for TreeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cache(e) => Some(e),
            Self::Wal(e) => Some(e),
            Self::Serializer(e) => Some(e),
            Self::Bucket(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CacheError> for TreeFailure {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}

impl From<WalError> for TreeFailure {
    fn from(e: WalError) -> Self {
        Self::Wal(e)
    }
}

impl From<SerializerError> for TreeFailure {
    fn from(e: SerializerError) -> Self {
        Self::Serializer(e)
    }
}

impl From<BucketError> for TreeFailure {
    fn from(e: BucketError) -> Self {
        match e {
            BucketError::Serializer(inner) => Self::Serializer(inner),
            other => Self::Bucket(other),
        }
    }
}
