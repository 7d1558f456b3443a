//! In-memory storage backend for testing.

use crate::backend::{check_bounds, IoMode, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Crash and corruption tests (clones share the same bytes, so a test can
///   keep a handle, drop the journal, tamper with the bytes and reopen)
/// - Ephemeral journals that don't need persistence
///
/// The alignment contract of [`IoMode::Direct`] is enforced exactly as the
/// file backend enforces it, so direct-mode behavior can be tested without
/// a filesystem that supports `O_DIRECT`.
///
/// # Example
///
/// ```rust
/// use ringlog_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.allocate(4096).unwrap();
/// backend.write_at(100, b"hello").unwrap();
/// assert_eq!(backend.read_at(100, 5).unwrap(), b"hello");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    mode: IoMode,
}

impl InMemoryBackend {
    /// Creates a new, unallocated, buffered in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, unallocated backend using the given I/O mode.
    #[must_use]
    pub fn with_mode(mode: IoMode) -> Self {
        Self {
            data: Arc::default(),
            mode,
        }
    }

    /// Creates a new backend with pre-existing data.
    ///
    /// The capacity is the length of `data`. Useful for recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>, mode: IoMode) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            mode,
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites bytes at `offset`, bypassing the alignment contract.
    ///
    /// Intended for tests that simulate torn writes or media corruption.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`] if the range exceeds the capacity.
    pub fn patch(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        check_bounds(offset, bytes.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn allocate(&mut self, capacity: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;
        if capacity < current {
            return Err(StorageError::CapacityShrink {
                current,
                requested: capacity,
            });
        }
        let capacity = usize::try_from(capacity).map_err(|_| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "capacity exceeds addressable memory",
            ))
        })?;
        data.resize(capacity, 0);
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        if data.is_empty() {
            return Err(StorageError::NotAllocated);
        }
        self.mode.check(offset, len, std::ptr::null())?;
        check_bounds(offset, len, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        self.mode.check(offset, bytes.len(), bytes.as_ptr())?;
        let mut data = self.data.write();
        if data.is_empty() {
            return Err(StorageError::NotAllocated);
        }
        check_bounds(offset, bytes.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // In-memory backend has no pending writes
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn io_mode(&self) -> IoMode {
        self.mode
    }
}
