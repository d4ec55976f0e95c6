//! Durability bracket around one mutating tree operation.
//!
//! Every page mutation goes through `AtomicOperation::modify`, which takes
//! the page lock, records the byte ranges the closure changes, and marks the
//! page dirty. On commit the recorded changes are logged once per touched
//! page and the bracket is closed. On rollback, or when an operation is
//! dropped before it finished, the before-images are written back in reverse
//! order and the bracket is closed as rolled back.
//!
//! Page allocation and file truncation are not journaled: pages allocated by
//! a rolled back operation stay allocated (and unreferenced).

use crate::error::TreeFailure;
use crate::storage::cache::{FileId, PageCache, PageIndex, PinnedPage};
use crate::storage::page::{Page, PageChange};
use crate::storage::wal::{Durability, OperationId};

struct JournalEntry<'a> {
    page: PinnedPage<'a>,
    changes: Vec<PageChange>,
}

/// One open durability bracket.
pub struct AtomicOperation<'a> {
    cache: &'a dyn PageCache,
    durability: &'a dyn Durability,
    id: OperationId,
    description: String,
    journal: Vec<JournalEntry<'a>>,
    finished: bool,
}

impl<'a> AtomicOperation<'a> {
    pub fn start(
        cache: &'a dyn PageCache,
        durability: &'a dyn Durability,
        description: &str,
    ) -> Result<Self, TreeFailure> {
        let id = durability.start_operation(description)?;
        Ok(Self {
            cache,
            durability,
            id,
            description: description.to_string(),
            journal: Vec::new(),
            finished: false,
        })
    }

    /// Run `body` inside a new operation, committing on success and rolling
    /// back on failure.
    pub fn run<R>(
        cache: &'a dyn PageCache,
        durability: &'a dyn Durability,
        description: &str,
        body: impl FnOnce(&mut Self) -> Result<R, TreeFailure>,
    ) -> Result<R, TreeFailure> {
        let mut op = Self::start(cache, durability, description)?;
        match body(&mut op) {
            Ok(result) => {
                op.commit()?;
                Ok(result)
            }
            Err(cause) => {
                tracing::warn!(
                    operation = op.id,
                    description = %op.description,
                    "rolling back operation: {cause}"
                );
                if let Err(rollback_error) = op.rollback() {
                    tracing::error!(
                        "rollback after failed operation also failed: {rollback_error}"
                    );
                }
                Err(cause)
            }
        }
    }

    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    #[must_use]
    pub const fn cache(&self) -> &'a dyn PageCache {
        self.cache
    }

    /// Number of page mutation windows recorded so far.
    #[must_use]
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Mutate `page` under its write lock, recording every change.
    ///
    /// Changes made before `mutate` fails are recorded as well, so a rollback
    /// restores them.
    pub fn modify<R>(
        &mut self,
        page: &PinnedPage<'a>,
        mutate: impl FnOnce(&mut Page) -> Result<R, TreeFailure>,
    ) -> Result<R, TreeFailure> {
        // The page lock must be released before mark_dirty: a flushing cache
        // takes page locks while holding its own.
        let (result, changes) = {
            let mut guard = page.write();
            guard.start_tracking();
            let result = mutate(&mut *guard);
            (result, guard.take_changes())
        };

        if !changes.is_empty() {
            self.journal.push(JournalEntry {
                page: page.clone(),
                changes,
            });
            self.cache.mark_dirty(page.file_id(), page.page_index())?;
        }
        result
    }

    /// Log the recorded changes and close the bracket.
    ///
    /// If logging fails the changes are rolled back and the logging error is
    /// returned.
    pub fn commit(mut self) -> Result<(), TreeFailure> {
        self.finished = true;
        let logged = self.log_changes().and_then(|()| {
            self.durability
                .end_operation(self.id, false)
                .map_err(TreeFailure::from)
        });

        if let Err(cause) = logged {
            tracing::warn!(
                operation = self.id,
                description = %self.description,
                "commit failed, rolling back: {cause}"
            );
            let undone = self.undo();
            self.durability.end_operation(self.id, true)?;
            undone?;
            return Err(cause);
        }
        Ok(())
    }

    /// Restore every recorded before-image and close the bracket.
    pub fn rollback(mut self) -> Result<(), TreeFailure> {
        self.finished = true;
        let undone = self.undo();
        self.durability.end_operation(self.id, true)?;
        undone
    }

    fn log_changes(&self) -> Result<(), TreeFailure> {
        let mut grouped: Vec<((FileId, PageIndex), Vec<PageChange>)> = Vec::new();
        for entry in &self.journal {
            let address = (entry.page.file_id(), entry.page.page_index());
            match grouped.iter_mut().find(|(existing, _)| *existing == address) {
                Some((_, changes)) => changes.extend(entry.changes.iter().cloned()),
                None => grouped.push((address, entry.changes.clone())),
            }
        }

        for ((file_id, page_index), changes) in &grouped {
            self.durability
                .log_page_changes(self.id, *file_id, *page_index, changes)?;
        }
        Ok(())
    }

    fn undo(&mut self) -> Result<(), TreeFailure> {
        let mut first_error = None;
        for entry in self.journal.drain(..).rev() {
            {
                let mut page = entry.page.write();
                for change in entry.changes.iter().rev() {
                    page.revert(change);
                }
            }
            if let Err(e) = self
                .cache
                .mark_dirty(entry.page.file_id(), entry.page.page_index())
            {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(TreeFailure::from(e)))
    }
}

impl Drop for AtomicOperation<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(
            operation = self.id,
            description = %self.description,
            "operation dropped before commit, rolling back"
        );
        let undone = self.undo();
        let ended = self.durability.end_operation(self.id, true);
        if let Err(e) = undone {
            tracing::error!(operation = self.id, "rollback failed: {e}");
        }
        if let Err(e) = ended {
            tracing::error!(operation = self.id, "failed to end operation: {e}");
        }
    }
}
