//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// How a backend moves bytes to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Ordinary page-cache I/O. Any offset and length is accepted.
    #[default]
    Buffered,
    /// Unbuffered I/O. Offsets, lengths and buffer addresses must all be
    /// multiples of `alignment`.
    Direct {
        /// Device block size in bytes (a power of two).
        alignment: usize,
    },
}

impl IoMode {
    /// Returns the alignment every request must honor (1 for buffered I/O).
    #[must_use]
    pub const fn alignment(self) -> usize {
        match self {
            Self::Buffered => 1,
            Self::Direct { alignment } => alignment,
        }
    }

    /// Returns `true` for [`IoMode::Direct`].
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    /// Checks a request against the alignment contract.
    ///
    /// Buffered mode accepts everything. Direct mode rejects a misaligned
    /// offset, length or buffer address with [`StorageError::Misaligned`].
    pub fn check(self, offset: u64, len: usize, ptr: *const u8) -> StorageResult<()> {
        let Self::Direct { alignment } = self else {
            return Ok(());
        };
        if offset % alignment as u64 != 0 {
            return Err(StorageError::Misaligned {
                what: "offset",
                value: offset,
                alignment,
            });
        }
        if len % alignment != 0 {
            return Err(StorageError::Misaligned {
                what: "length",
                value: len as u64,
                alignment,
            });
        }
        if len > 0 && (ptr as usize) % alignment != 0 {
            return Err(StorageError::Misaligned {
                what: "buffer address",
                value: ptr as usize as u64,
                alignment,
            });
        }
        Ok(())
    }
}

/// A fixed-capacity byte store that a journal writes into.
///
/// Backends are **opaque byte stores** addressed by offset. They know nothing
/// about journal headers or records; the journal owns all format
/// interpretation.
///
/// # Invariants
///
/// - Capacity is set once by `allocate` and never shrinks
/// - `read_at` returns exactly the bytes last written at that range
/// - `sync` is the durability boundary: bytes written before a successful
///   `sync` survive process and machine crashes
/// - In [`IoMode::Direct`] every request honors [`IoMode::check`]
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - Preallocated files
pub trait StorageBackend: Send + Sync {
    /// Ensures the store can hold `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if space cannot be reserved or if `capacity` is
    /// smaller than the current capacity.
    fn allocate(&mut self, capacity: u64) -> StorageResult<()>;

    /// Returns the allocated capacity in bytes.
    fn capacity(&self) -> u64;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The range extends beyond the capacity
    /// - The request violates the alignment contract
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, overwriting whatever was there.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the capacity, the
    /// request violates the alignment contract, or an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes every previous write durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the I/O mode the backend was opened with.
    fn io_mode(&self) -> IoMode;

    /// Returns the alignment every request must honor.
    fn alignment(&self) -> usize {
        self.io_mode().alignment()
    }
}

/// Checks that `[offset, offset + len)` lies inside `capacity`.
pub(crate) fn check_bounds(offset: u64, len: usize, capacity: u64) -> StorageResult<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}
