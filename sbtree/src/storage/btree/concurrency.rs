//! Tree-level reader/writer lock.
//!
//! Lookups and range scans hold the shared side for the whole call; every
//! mutation and lifecycle change holds the exclusive side. Page locks are
//! taken underneath this lock and never the other way round.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct SharedResource<T> {
    inner: RwLock<T>,
}

impl<T> SharedResource<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn shared(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().expect("tree lock poisoned")
    }

    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().expect("tree lock poisoned")
    }
}
