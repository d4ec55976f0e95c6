//! File-backed page cache.
//!
//! Every cache file is one OS file inside a directory. Pages are stored as
//! fixed-size frames: the page bytes followed by a CRC32 of those bytes, so
//! torn or corrupted pages are detected when they are read back.
//!
//! Pages stay cached after their first load; dirty pages are written back on
//! `flush_file` and `close_file(.., true)`.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::cache::{CacheEntry, CacheError, FileId, PageCache, PageIndex};
use crate::storage::page::{MIN_PAGE_SIZE, Page};

/// Bytes appended to every page on disk (the CRC32).
pub const FRAME_CHECKSUM_SIZE: usize = 4;

struct OpenFile {
    name: String,
    path: PathBuf,
    file: File,
    pages: HashMap<PageIndex, Arc<CacheEntry>>,
    dirty: HashSet<PageIndex>,
    filled_up_to: u64,
}

struct FileCacheState {
    files: HashMap<FileId, OpenFile>,
    names: HashMap<String, FileId>,
    next_file_id: FileId,
}

impl FileCacheState {
    fn file(&mut self, file_id: FileId) -> Result<&mut OpenFile, CacheError> {
        self.files
            .get_mut(&file_id)
            .ok_or(CacheError::UnknownFile(file_id))
    }
}

/// A page cache storing each file in `directory`.
pub struct FilePageCache {
    directory: PathBuf,
    page_size: usize,
    state: Mutex<FileCacheState>,
}

impl FilePageCache {
    /// Create a cache rooted at `directory`, creating the directory if needed.
    pub fn new(directory: &Path, page_size: usize) -> Result<Self, CacheError> {
        if page_size < MIN_PAGE_SIZE {
            return Err(CacheError::InvalidPageSize(page_size));
        }
        std::fs::create_dir_all(directory)?;

        Ok(Self {
            directory: directory.to_path_buf(),
            page_size,
            state: Mutex::new(FileCacheState {
                files: HashMap::new(),
                names: HashMap::new(),
                next_file_id: 1,
            }),
        })
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn state(&self) -> MutexGuard<'_, FileCacheState> {
        self.state.lock().expect("lock poisoned")
    }

    const fn frame_size(&self) -> u64 {
        (self.page_size + FRAME_CHECKSUM_SIZE) as u64
    }

    fn read_frame(&self, file: &mut File, page_index: PageIndex) -> Result<Page, CacheError> {
        let mut frame = vec![0u8; self.page_size + FRAME_CHECKSUM_SIZE];
        file.seek(SeekFrom::Start(page_index * self.frame_size()))?;
        file.read_exact(&mut frame)?;

        let mut stored = [0u8; FRAME_CHECKSUM_SIZE];
        stored.copy_from_slice(&frame[self.page_size..]);
        let expected = u32::from_le_bytes(stored);

        frame.truncate(self.page_size);
        let page = Page::from_bytes(frame);
        let actual = page.checksum();
        if expected != actual {
            return Err(CacheError::ChecksumMismatch {
                page_index,
                expected,
                actual,
            });
        }

        Ok(page)
    }

    fn write_back(&self, open: &mut OpenFile) -> Result<(), CacheError> {
        let mut dirty: Vec<PageIndex> = open.dirty.iter().copied().collect();
        dirty.sort_unstable();

        for page_index in dirty {
            let Some(entry) = open.pages.get(&page_index) else {
                continue;
            };
            let frame = {
                let page = entry.read();
                let mut frame = Vec::with_capacity(self.page_size + FRAME_CHECKSUM_SIZE);
                frame.extend_from_slice(page.as_bytes());
                frame.extend_from_slice(&page.checksum().to_le_bytes());
                frame
            };
            open.file
                .seek(SeekFrom::Start(page_index * self.frame_size()))?;
            open.file.write_all(&frame)?;
        }

        open.file.sync_all()?;
        open.dirty.clear();
        Ok(())
    }
}

impl PageCache for FilePageCache {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn exists(&self, name: &str) -> bool {
        self.state().names.contains_key(name) || self.directory.join(name).exists()
    }

    fn open_file(&self, name: &str) -> Result<FileId, CacheError> {
        let mut state = self.state();
        if let Some(&file_id) = state.names.get(name) {
            return Ok(file_id);
        }

        let path = self.directory.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let filled_up_to = file.metadata()?.len() / self.frame_size();

        let file_id = state.next_file_id;
        state.next_file_id += 1;
        state.names.insert(name.to_string(), file_id);
        state.files.insert(
            file_id,
            OpenFile {
                name: name.to_string(),
                path,
                file,
                pages: HashMap::new(),
                dirty: HashSet::new(),
                filled_up_to,
            },
        );

        tracing::debug!(file = name, file_id, pages = filled_up_to, "opened cache file");
        Ok(file_id)
    }

    fn load(&self, file_id: FileId, page_index: PageIndex) -> Result<Arc<CacheEntry>, CacheError> {
        let mut state = self.state();
        let open = state.file(file_id)?;

        if page_index >= open.filled_up_to {
            return Err(CacheError::PageOutOfBounds {
                file_id,
                page_index,
                filled_up_to: open.filled_up_to,
            });
        }

        let entry = if let Some(entry) = open.pages.get(&page_index) {
            Arc::clone(entry)
        } else {
            let page = self.read_frame(&mut open.file, page_index)?;
            let entry = Arc::new(CacheEntry::new(file_id, page_index, page));
            open.pages.insert(page_index, Arc::clone(&entry));
            entry
        };

        entry.pin();
        Ok(entry)
    }

    fn allocate_new_page(&self, file_id: FileId) -> Result<Arc<CacheEntry>, CacheError> {
        let mut state = self.state();
        let open = state.file(file_id)?;

        let page_index = open.filled_up_to;
        open.filled_up_to += 1;

        let entry = Arc::new(CacheEntry::new(
            file_id,
            page_index,
            Page::new(self.page_size),
        ));
        entry.pin();
        open.pages.insert(page_index, Arc::clone(&entry));
        open.dirty.insert(page_index);
        Ok(entry)
    }

    fn release(&self, entry: &Arc<CacheEntry>) {
        entry.unpin();
    }

    fn mark_dirty(&self, file_id: FileId, page_index: PageIndex) -> Result<(), CacheError> {
        let mut state = self.state();
        state.file(file_id)?.dirty.insert(page_index);
        Ok(())
    }

    fn filled_up_to(&self, file_id: FileId) -> Result<u64, CacheError> {
        let mut state = self.state();
        Ok(state.file(file_id)?.filled_up_to)
    }

    fn truncate_file(&self, file_id: FileId) -> Result<(), CacheError> {
        let mut state = self.state();
        let open = state.file(file_id)?;
        open.file.set_len(0)?;
        open.file.sync_all()?;
        open.pages.clear();
        open.dirty.clear();
        open.filled_up_to = 0;
        Ok(())
    }

    fn delete_file(&self, file_id: FileId) -> Result<(), CacheError> {
        let mut state = self.state();
        let open = state
            .files
            .remove(&file_id)
            .ok_or(CacheError::UnknownFile(file_id))?;
        state.names.remove(&open.name);
        drop(open.file);
        std::fs::remove_file(&open.path)?;

        tracing::debug!(file = %open.name, file_id, "deleted cache file");
        Ok(())
    }

    fn close_file(&self, file_id: FileId, flush: bool) -> Result<(), CacheError> {
        let mut state = self.state();
        let mut open = state
            .files
            .remove(&file_id)
            .ok_or(CacheError::UnknownFile(file_id))?;
        state.names.remove(&open.name);
        drop(state);

        if flush {
            self.write_back(&mut open)?;
        }
        Ok(())
    }

    fn flush_file(&self, file_id: FileId) -> Result<(), CacheError> {
        let mut state = self.state();
        let open = state.file(file_id)?;
        self.write_back(open)
    }
}
