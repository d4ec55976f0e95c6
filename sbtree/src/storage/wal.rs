//! Durability contract and an in-memory write-ahead log.
//!
//! The index brackets every mutating operation with `start_operation` /
//! `end_operation` and, before committing, hands the durability layer the
//! byte ranges it changed on each touched page. Log layout and crash
//! recovery belong to the storage engine; `MemoryWal` only records what it
//! is given so tests can inspect it.
//!
//! # Log Record Format
//!
//! Each record has the following layout:
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | record_length (4 bytes, includes header+payload) |
//! | 4        | record_type (1 byte)                             |
//! | 5-12     | operation_id (8 bytes)                           |
//! | 13-20    | lsn (8 bytes) - Log Sequence Number              |
//! | 21-N     | payload (variable, depends on type)              |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```

// record and change lengths are bounded by the page size
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::storage::cache::{FileId, PageIndex};
use crate::storage::page::PageChange;

/// Log record header size (before payload).
/// `record_length` (4) + `record_type` (1) + `operation_id` (8) + lsn (8) = 21 bytes
const RECORD_HEADER_SIZE: usize = 21;

/// CRC32 checksum size at end of record.
const CHECKSUM_SIZE: usize = 4;

/// Log Sequence Number - monotonically increasing identifier for log records.
pub type Lsn = u64;

/// Identifier of one durability bracket.
pub type OperationId = u64;

/// Contract between the index and the write-ahead log.
pub trait Durability: Send + Sync {
    /// Open a bracket for one logical operation.
    fn start_operation(&self, description: &str) -> Result<OperationId, WalError>;

    /// Record the changes made to one page within `operation`.
    fn log_page_changes(
        &self,
        operation: OperationId,
        file_id: FileId,
        page_index: PageIndex,
        changes: &[PageChange],
    ) -> Result<(), WalError>;

    /// Close the bracket, committing it or marking it rolled back.
    fn end_operation(&self, operation: OperationId, rollback: bool) -> Result<(), WalError>;
}

/// Durability layer that accepts everything and records nothing.
#[derive(Debug, Default)]
pub struct NoopDurability {
    next_operation: AtomicU64,
}

impl NoopDurability {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_operation: AtomicU64::new(1),
        }
    }
}

impl Durability for NoopDurability {
    fn start_operation(&self, _description: &str) -> Result<OperationId, WalError> {
        Ok(self.next_operation.fetch_add(1, Ordering::Relaxed))
    }

    fn log_page_changes(
        &self,
        _operation: OperationId,
        _file_id: FileId,
        _page_index: PageIndex,
        _changes: &[PageChange],
    ) -> Result<(), WalError> {
        Ok(())
    }

    fn end_operation(&self, _operation: OperationId, _rollback: bool) -> Result<(), WalError> {
        Ok(())
    }
}

/// Log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Operation start marker.
    Start = 0x01,
    /// Byte-range changes of one page.
    PageChanges = 0x02,
    /// Operation commit marker.
    Commit = 0x03,
    /// Operation rollback marker.
    Rollback = 0x04,
}

impl TryFrom<u8> for LogRecordType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::PageChanges),
            0x03 => Ok(Self::Commit),
            0x04 => Ok(Self::Rollback),
            _ => Err(value),
        }
    }
}

/// Payload for different log record types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordPayload {
    /// Operation start, with a human-readable description.
    Start { description: String },
    /// Changes made to one page.
    PageChanges {
        file_id: FileId,
        page_index: PageIndex,
        changes: Vec<PageChange>,
    },
    /// Operation committed.
    Commit,
    /// Operation rolled back.
    Rollback,
}

impl LogRecordPayload {
    /// Get the record type for this payload.
    #[must_use]
    pub const fn record_type(&self) -> LogRecordType {
        match self {
            Self::Start { .. } => LogRecordType::Start,
            Self::PageChanges { .. } => LogRecordType::PageChanges,
            Self::Commit => LogRecordType::Commit,
            Self::Rollback => LogRecordType::Rollback,
        }
    }

    /// Serialize the payload to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            Self::Start { description } => {
                bytes.extend_from_slice(&(description.len() as u32).to_le_bytes());
                bytes.extend_from_slice(description.as_bytes());
            }
            Self::PageChanges {
                file_id,
                page_index,
                changes,
            } => {
                bytes.extend_from_slice(&file_id.to_le_bytes());
                bytes.extend_from_slice(&page_index.to_le_bytes());
                bytes.extend_from_slice(&(changes.len() as u32).to_le_bytes());
                for change in changes {
                    bytes.extend_from_slice(&(change.offset as u32).to_le_bytes());
                    bytes.extend_from_slice(&(change.after.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(&change.before);
                    bytes.extend_from_slice(&change.after);
                }
            }
            Self::Commit | Self::Rollback => {}
        }
        bytes
    }

    /// Deserialize a payload of the given type.
    pub fn from_bytes(record_type: LogRecordType, bytes: &[u8]) -> Result<Self, WalError> {
        let mut reader = ByteReader::new(bytes);
        let payload = match record_type {
            LogRecordType::Start => {
                let len = reader.u32()? as usize;
                let description = String::from_utf8(reader.take(len)?.to_vec())
                    .map_err(|_| WalError::CorruptRecord)?;
                Self::Start { description }
            }
            LogRecordType::PageChanges => {
                let file_id = reader.u32()?;
                let page_index = reader.u64()?;
                let count = reader.u32()? as usize;
                let mut changes = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let offset = reader.u32()? as usize;
                    let len = reader.u32()? as usize;
                    let before = reader.take(len)?.to_vec();
                    let after = reader.take(len)?.to_vec();
                    changes.push(PageChange {
                        offset,
                        before,
                        after,
                    });
                }
                Self::PageChanges {
                    file_id,
                    page_index,
                    changes,
                }
            }
            LogRecordType::Commit => Self::Commit,
            LogRecordType::Rollback => Self::Rollback,
        };

        if !reader.is_empty() {
            return Err(WalError::CorruptRecord);
        }
        Ok(payload)
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WalError> {
        if self.bytes.len() < len {
            return Err(WalError::CorruptRecord);
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, WalError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, WalError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A complete log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Operation this record belongs to.
    pub operation: OperationId,
    /// Log Sequence Number (position in the log).
    pub lsn: Lsn,
    /// The record payload.
    pub payload: LogRecordPayload,
}

impl LogRecord {
    /// Serialize this record to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_bytes = self.payload.to_bytes();
        let total_len = RECORD_HEADER_SIZE + payload_bytes.len() + CHECKSUM_SIZE;

        let mut bytes = Vec::with_capacity(total_len);
        bytes.extend_from_slice(&(total_len as u32).to_le_bytes());
        bytes.push(self.payload.record_type() as u8);
        bytes.extend_from_slice(&self.operation.to_le_bytes());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&payload_bytes);

        // CRC32 checksum - computed over everything before it
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        bytes
    }

    /// Deserialize a record from bytes.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalError> {
        if bytes.len() < RECORD_HEADER_SIZE + CHECKSUM_SIZE {
            return Err(WalError::CorruptRecord);
        }

        let mut reader = ByteReader::new(bytes);
        let record_len = reader.u32()? as usize;
        if record_len < RECORD_HEADER_SIZE + CHECKSUM_SIZE || record_len > bytes.len() {
            return Err(WalError::CorruptRecord);
        }

        let mut stored = [0u8; CHECKSUM_SIZE];
        stored.copy_from_slice(&bytes[record_len - CHECKSUM_SIZE..record_len]);
        let stored_checksum = u32::from_le_bytes(stored);
        let computed_checksum = crc32fast::hash(&bytes[..record_len - CHECKSUM_SIZE]);
        if stored_checksum != computed_checksum {
            return Err(WalError::ChecksumMismatch {
                expected: stored_checksum,
                actual: computed_checksum,
            });
        }

        let type_byte = reader.take(1)?[0];
        let record_type = LogRecordType::try_from(type_byte).map_err(WalError::InvalidRecordType)?;
        let operation = reader.u64()?;
        let lsn = reader.u64()?;

        let payload_bytes = &bytes[RECORD_HEADER_SIZE..record_len - CHECKSUM_SIZE];
        let payload = LogRecordPayload::from_bytes(record_type, payload_bytes)?;

        Ok((
            Self {
                operation,
                lsn,
                payload,
            },
            record_len,
        ))
    }
}

#[derive(Default)]
struct MemoryWalState {
    log: Vec<u8>,
    next_lsn: Lsn,
    next_operation: OperationId,
    active: HashSet<OperationId>,
    committed: u64,
    rolled_back: u64,
    fail_next_log: bool,
}

impl MemoryWalState {
    fn append(&mut self, operation: OperationId, payload: LogRecordPayload) -> Lsn {
        self.next_lsn += 1;
        let record = LogRecord {
            operation,
            lsn: self.next_lsn,
            payload,
        };
        self.log.extend_from_slice(&record.to_bytes());
        self.next_lsn
    }
}

/// Write-ahead log kept in memory.
///
/// Records are encoded exactly as they would be written to disk, so reading
/// them back exercises the record codec and checksum.
#[derive(Default)]
pub struct MemoryWal {
    state: Mutex<MemoryWalState>,
}

impl MemoryWal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn state(&self) -> MutexGuard<'_, MemoryWalState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Decode every record written so far.
    pub fn records(&self) -> Result<Vec<LogRecord>, WalError> {
        let state = self.state();
        let mut records = Vec::new();
        let mut offset = 0;
        while offset < state.log.len() {
            let (record, consumed) = LogRecord::from_bytes(&state.log[offset..])?;
            records.push(record);
            offset += consumed;
        }
        Ok(records)
    }

    /// Number of operations that ended with a commit.
    #[must_use]
    pub fn committed_operations(&self) -> u64 {
        self.state().committed
    }

    /// Number of operations that ended with a rollback.
    #[must_use]
    pub fn rolled_back_operations(&self) -> u64 {
        self.state().rolled_back
    }

    /// Number of operations started but not yet ended.
    #[must_use]
    pub fn active_operations(&self) -> usize {
        self.state().active.len()
    }

    /// Size of the encoded log in bytes.
    #[must_use]
    pub fn log_size(&self) -> usize {
        self.state().log.len()
    }

    /// Make the next `log_page_changes` call fail.
    pub fn fail_next_log(&self) {
        self.state().fail_next_log = true;
    }
}

impl Durability for MemoryWal {
    fn start_operation(&self, description: &str) -> Result<OperationId, WalError> {
        let mut state = self.state();
        state.next_operation += 1;
        let operation = state.next_operation;
        state.active.insert(operation);
        state.append(
            operation,
            LogRecordPayload::Start {
                description: description.to_string(),
            },
        );
        Ok(operation)
    }

    fn log_page_changes(
        &self,
        operation: OperationId,
        file_id: FileId,
        page_index: PageIndex,
        changes: &[PageChange],
    ) -> Result<(), WalError> {
        let mut state = self.state();
        if !state.active.contains(&operation) {
            return Err(WalError::UnknownOperation(operation));
        }
        if std::mem::take(&mut state.fail_next_log) {
            return Err(WalError::InjectedFault("log page changes failed".to_string()));
        }
        state.append(
            operation,
            LogRecordPayload::PageChanges {
                file_id,
                page_index,
                changes: changes.to_vec(),
            },
        );
        Ok(())
    }

    fn end_operation(&self, operation: OperationId, rollback: bool) -> Result<(), WalError> {
        let mut state = self.state();
        if !state.active.remove(&operation) {
            return Err(WalError::UnknownOperation(operation));
        }
        if rollback {
            state.rolled_back += 1;
            state.append(operation, LogRecordPayload::Rollback);
        } else {
            state.committed += 1;
            state.append(operation, LogRecordPayload::Commit);
        }
        Ok(())
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug)]
pub enum WalError {
    /// Corrupt log record.
    CorruptRecord,
    /// Invalid record type byte.
    InvalidRecordType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The operation id was never started or has already ended.
    UnknownOperation(OperationId),
    /// Injected fault for testing.
    InjectedFault(String),
}

impl std::fmt::Display for WalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptRecord => write!(f, "corrupt WAL record"),
            Self::InvalidRecordType(t) => write!(f, "invalid WAL record type: 0x{t:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "WAL checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}"
                )
            }
            Self::UnknownOperation(op) => write!(f, "unknown durability operation: {op}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for WalError {}
