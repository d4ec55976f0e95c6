//! In-memory page cache for deterministic testing.
//!
//! This module provides an in-memory implementation of the `PageCache` trait
//! with support for fault injection:
//! - Probabilistic load, allocation and flush errors from a seeded RNG
//! - A deterministic countdown that fails exactly one later page access or
//!   file open
//!
//! Files survive `close_file` so a tree can be closed and reopened against
//! the same cache, mirroring what a disk-backed cache does.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::cache::{CacheEntry, CacheError, FileId, PageCache, PageIndex};
use crate::storage::page::{MIN_PAGE_SIZE, Page};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a page load error (0.0 - 1.0).
    pub load_error_rate: f64,
    /// Probability of a page allocation error (0.0 - 1.0).
    pub allocate_error_rate: f64,
    /// Probability of a flush error (0.0 - 1.0).
    pub flush_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            load_error_rate: 0.001,
            allocate_error_rate: 0.001,
            flush_error_rate: 0.001,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            load_error_rate: 0.02,
            allocate_error_rate: 0.05,
            flush_error_rate: 0.05,
        }
    }
}

/// Statistics about in-memory cache operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryCacheStats {
    /// Number of successful page loads.
    pub loads: u64,
    /// Number of successful page allocations.
    pub allocations: u64,
    /// Number of pin releases.
    pub releases: u64,
    /// Number of `mark_dirty` calls.
    pub dirty_marks: u64,
    /// Number of injected faults.
    pub injected_faults: u64,
}

struct MemoryFile {
    name: String,
    pages: Vec<Arc<CacheEntry>>,
    dirty: HashSet<PageIndex>,
    open: bool,
}

struct MemoryState {
    files: HashMap<FileId, MemoryFile>,
    names: HashMap<String, FileId>,
    next_file_id: FileId,
    fault_config: FaultConfig,
    rng: StdRng,
    fail_after: Option<u64>,
    stats: MemoryCacheStats,
}

impl MemoryState {
    fn open_file(&mut self, file_id: FileId) -> Result<&mut MemoryFile, CacheError> {
        self.files
            .get_mut(&file_id)
            .filter(|file| file.open)
            .ok_or(CacheError::UnknownFile(file_id))
    }

    fn inject_fault(&mut self, operation: &str, rate: f64) -> Result<(), CacheError> {
        if let Some(remaining) = self.fail_after {
            if remaining == 0 {
                self.fail_after = None;
                self.stats.injected_faults += 1;
                return Err(CacheError::InjectedFault(format!(
                    "{operation} failed by countdown"
                )));
            }
            self.fail_after = Some(remaining - 1);
        }

        if rate > 0.0 && self.rng.random::<f64>() < rate {
            self.stats.injected_faults += 1;
            return Err(CacheError::InjectedFault(format!("{operation} failed")));
        }

        Ok(())
    }
}

/// In-memory page cache.
///
/// # Thread Safety
///
/// All state sits behind one mutex; page contents are additionally guarded by
/// each entry's own lock, so pinned pages can be read and written without
/// holding the cache mutex.
pub struct MemoryPageCache {
    page_size: usize,
    state: Mutex<MemoryState>,
}

impl MemoryPageCache {
    /// Default seed for the fault injection RNG.
    pub const DEFAULT_SEED: u64 = 0x5b7e_e000;

    /// Create an empty cache with pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Result<Self, CacheError> {
        Self::with_seed(page_size, Self::DEFAULT_SEED)
    }

    /// Create an empty cache whose fault injection uses the given seed.
    pub fn with_seed(page_size: usize, seed: u64) -> Result<Self, CacheError> {
        if page_size < MIN_PAGE_SIZE {
            return Err(CacheError::InvalidPageSize(page_size));
        }

        Ok(Self {
            page_size,
            state: Mutex::new(MemoryState {
                files: HashMap::new(),
                names: HashMap::new(),
                next_file_id: 1,
                fault_config: FaultConfig::no_faults(),
                rng: StdRng::seed_from_u64(seed),
                fail_after: None,
                stats: MemoryCacheStats::default(),
            }),
        })
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Replace the probabilistic fault configuration.
    pub fn set_fault_config(&self, config: FaultConfig) {
        self.state().fault_config = config;
    }

    /// Let `successes` more loads, allocations or file opens succeed, then
    /// fail the next one.
    pub fn fail_after(&self, successes: u64) {
        self.state().fail_after = Some(successes);
    }

    /// Cancel a pending countdown set by `fail_after`.
    pub fn clear_countdown(&self) {
        self.state().fail_after = None;
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> MemoryCacheStats {
        self.state().stats.clone()
    }

    /// Total number of outstanding pins across all files.
    #[must_use]
    pub fn pinned_pages(&self) -> usize {
        self.state()
            .files
            .values()
            .flat_map(|file| file.pages.iter())
            .map(|entry| entry.pin_count())
            .sum()
    }

    /// Number of files currently open.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.state().files.values().filter(|file| file.open).count()
    }

    /// Pages marked dirty and not yet flushed.
    pub fn dirty_pages(&self, file_id: FileId) -> Result<usize, CacheError> {
        let mut state = self.state();
        Ok(state.open_file(file_id)?.dirty.len())
    }
}

impl PageCache for MemoryPageCache {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn exists(&self, name: &str) -> bool {
        self.state().names.contains_key(name)
    }

    fn open_file(&self, name: &str) -> Result<FileId, CacheError> {
        let mut state = self.state();
        state.inject_fault("open", 0.0)?;

        if let Some(&file_id) = state.names.get(name) {
            if let Some(file) = state.files.get_mut(&file_id) {
                file.open = true;
            }
            return Ok(file_id);
        }

        let file_id = state.next_file_id;
        state.next_file_id += 1;
        state.names.insert(name.to_string(), file_id);
        state.files.insert(
            file_id,
            MemoryFile {
                name: name.to_string(),
                pages: Vec::new(),
                dirty: HashSet::new(),
                open: true,
            },
        );
        Ok(file_id)
    }

    fn load(&self, file_id: FileId, page_index: PageIndex) -> Result<Arc<CacheEntry>, CacheError> {
        let mut state = self.state();
        let rate = state.fault_config.load_error_rate;
        state.inject_fault("load", rate)?;

        let file = state.open_file(file_id)?;
        let filled_up_to = file.pages.len() as u64;
        let entry = usize::try_from(page_index)
            .ok()
            .and_then(|index| file.pages.get(index))
            .map(Arc::clone)
            .ok_or(CacheError::PageOutOfBounds {
                file_id,
                page_index,
                filled_up_to,
            })?;

        entry.pin();
        state.stats.loads += 1;
        Ok(entry)
    }

    fn allocate_new_page(&self, file_id: FileId) -> Result<Arc<CacheEntry>, CacheError> {
        let mut state = self.state();
        let rate = state.fault_config.allocate_error_rate;
        state.inject_fault("allocate", rate)?;

        let page_size = self.page_size;
        let file = state.open_file(file_id)?;
        let page_index = file.pages.len() as PageIndex;
        let entry = Arc::new(CacheEntry::new(file_id, page_index, Page::new(page_size)));
        entry.pin();
        file.pages.push(Arc::clone(&entry));
        file.dirty.insert(page_index);

        state.stats.allocations += 1;
        Ok(entry)
    }

    fn release(&self, entry: &Arc<CacheEntry>) {
        entry.unpin();
        self.state().stats.releases += 1;
    }

    fn mark_dirty(&self, file_id: FileId, page_index: PageIndex) -> Result<(), CacheError> {
        let mut state = self.state();
        state.open_file(file_id)?.dirty.insert(page_index);
        state.stats.dirty_marks += 1;
        Ok(())
    }

    fn filled_up_to(&self, file_id: FileId) -> Result<u64, CacheError> {
        let mut state = self.state();
        Ok(state.open_file(file_id)?.pages.len() as u64)
    }

    fn truncate_file(&self, file_id: FileId) -> Result<(), CacheError> {
        let mut state = self.state();
        let file = state.open_file(file_id)?;
        file.pages.clear();
        file.dirty.clear();
        Ok(())
    }

    fn delete_file(&self, file_id: FileId) -> Result<(), CacheError> {
        let mut state = self.state();
        let file = state
            .files
            .remove(&file_id)
            .ok_or(CacheError::UnknownFile(file_id))?;
        state.names.remove(&file.name);
        Ok(())
    }

    fn close_file(&self, file_id: FileId, flush: bool) -> Result<(), CacheError> {
        if flush {
            self.flush_file(file_id)?;
        }
        let mut state = self.state();
        state.open_file(file_id)?.open = false;
        Ok(())
    }

    fn flush_file(&self, file_id: FileId) -> Result<(), CacheError> {
        let mut state = self.state();
        let rate = state.fault_config.flush_error_rate;
        if rate > 0.0 && state.rng.random::<f64>() < rate {
            state.stats.injected_faults += 1;
            return Err(CacheError::InjectedFault("flush failed".to_string()));
        }
        state.open_file(file_id)?.dirty.clear();
        Ok(())
    }
}
