//! Journal configuration.

use crate::error::{JournalError, JournalResult};
use std::time::Duration;

/// Smallest block size a journal accepts.
pub const MIN_BLOCK_SIZE: u32 = 512;

/// Frame alignment in buffered mode.
pub const BUFFERED_FRAME_ALIGNMENT: u32 = 8;

/// Configuration for creating or opening a journal.
#[derive(Debug, Clone, Copy)]
pub struct JournalConfig {
    /// Total size of the backing region in bytes, header block included.
    pub capacity: u64,

    /// Block size in bytes. The header occupies the first block; in direct
    /// mode every frame is padded to a whole number of blocks.
    pub block_size: u32,

    /// Whether the backend performs direct (unbuffered) I/O.
    pub direct_io: bool,

    /// Whether batches are handed to a separate I/O thread.
    pub async_io: bool,

    /// Batches that may be queued for the I/O thread at once.
    pub aio_depth: usize,

    /// Most entries gathered into one write batch.
    pub max_batch_entries: usize,

    /// Most frame bytes gathered into one write batch. A single larger
    /// entry still forms a batch of its own.
    pub max_batch_bytes: usize,

    /// How many times a failed write or sync is retried before the journal
    /// is declared broken.
    pub io_retries: u32,

    /// Pause between retries.
    pub retry_backoff: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024, // 64 MB
            block_size: 4096,
            direct_io: false,
            async_io: false,
            aio_depth: 4,
            max_batch_entries: 256,
            max_batch_bytes: 4 * 1024 * 1024, // 4 MB
            io_retries: 2,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total capacity.
    #[must_use]
    pub const fn capacity(mut self, bytes: u64) -> Self {
        self.capacity = bytes;
        self
    }

    /// Sets the block size.
    #[must_use]
    pub const fn block_size(mut self, bytes: u32) -> Self {
        self.block_size = bytes;
        self
    }

    /// Enables or disables direct I/O.
    #[must_use]
    pub const fn direct_io(mut self, value: bool) -> Self {
        self.direct_io = value;
        self
    }

    /// Enables or disables the asynchronous I/O thread.
    #[must_use]
    pub const fn async_io(mut self, value: bool) -> Self {
        self.async_io = value;
        self
    }

    /// Sets the asynchronous submission depth.
    #[must_use]
    pub const fn aio_depth(mut self, depth: usize) -> Self {
        self.aio_depth = depth;
        self
    }

    /// Sets the batch entry limit.
    #[must_use]
    pub const fn max_batch_entries(mut self, entries: usize) -> Self {
        self.max_batch_entries = entries;
        self
    }

    /// Sets the batch byte limit.
    #[must_use]
    pub const fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets the number of I/O retries.
    #[must_use]
    pub const fn io_retries(mut self, retries: u32) -> Self {
        self.io_retries = retries;
        self
    }

    /// Sets the pause between I/O retries.
    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Alignment every frame is padded to.
    #[must_use]
    pub const fn frame_alignment(&self) -> u32 {
        if self.direct_io {
            self.block_size
        } else {
            BUFFERED_FRAME_ALIGNMENT
        }
    }

    /// Offset where the ring begins (the header takes the first block).
    #[must_use]
    pub const fn header_end(&self) -> u64 {
        self.block_size as u64
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> JournalResult<()> {
        if !self.block_size.is_power_of_two() || self.block_size < MIN_BLOCK_SIZE {
            return Err(JournalError::invalid_config(format!(
                "block size {} must be a power of two of at least {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        let block = u64::from(self.block_size);
        if self.capacity % block != 0 {
            return Err(JournalError::invalid_config(format!(
                "capacity {} is not a multiple of the block size {block}",
                self.capacity
            )));
        }
        if self.capacity < 4 * block {
            return Err(JournalError::invalid_config(format!(
                "capacity {} leaves less than three blocks for the ring",
                self.capacity
            )));
        }
        if self.aio_depth == 0 {
            return Err(JournalError::invalid_config("aio depth must be at least 1"));
        }
        if self.max_batch_entries == 0 {
            return Err(JournalError::invalid_config(
                "batches must hold at least one entry",
            ));
        }
        if self.max_batch_bytes < self.block_size as usize {
            return Err(JournalError::invalid_config(format!(
                "batch byte limit {} is smaller than one block",
                self.max_batch_bytes
            )));
        }
        Ok(())
    }
}
