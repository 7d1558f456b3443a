//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request touches bytes outside the allocated capacity.
    #[error("access out of bounds: offset {offset}, len {len}, capacity {capacity}")]
    OutOfBounds {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        len: usize,
        /// The allocated capacity.
        capacity: u64,
    },

    /// A direct I/O request was not aligned to the device block size.
    #[error("misaligned {what} {value} (direct I/O requires multiples of {alignment})")]
    Misaligned {
        /// Which part of the request was misaligned (offset, length, buffer).
        what: &'static str,
        /// The offending value.
        value: u64,
        /// The required alignment.
        alignment: usize,
    },

    /// The backend has no capacity yet; `allocate` must be called first.
    #[error("backing store has not been allocated")]
    NotAllocated,

    /// Another process holds the exclusive lock on the backing file.
    #[error("backing store is locked by another owner")]
    Locked,

    /// `allocate` was asked to shrink an existing store.
    #[error("cannot shrink backing store from {current} to {requested} bytes")]
    CapacityShrink {
        /// The current capacity.
        current: u64,
        /// The requested capacity.
        requested: u64,
    },
}
