//! Error types for the journal.

use crate::types::{JournalId, Phase, SequenceNumber};
use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors returned by journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Backing store error.
    #[error("storage error: {0}")]
    Storage(#[from] ringlog_storage::StorageError),

    /// I/O error outside the backing store (thread spawn, for one).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal header could not be validated.
    #[error("cannot open journal: {0}")]
    Open(#[from] OpenError),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with it.
        message: String,
    },

    /// The journal is not accepting writes.
    #[error("journal is not writeable (phase: {phase})")]
    NotWriteable {
        /// The phase the journal was in.
        phase: Phase,
    },

    /// A submitted sequence number does not strictly increase.
    #[error("sequence {sequence} does not follow last submitted {last}")]
    SequenceOutOfOrder {
        /// The rejected sequence.
        sequence: SequenceNumber,
        /// The last accepted sequence.
        last: SequenceNumber,
    },

    /// The entry's frame is larger than the whole ring.
    #[error("entry needs {frame_len} bytes but the ring holds only {usable}")]
    EntryTooLarge {
        /// On-disk size of the frame.
        frame_len: u64,
        /// Usable ring size.
        usable: u64,
    },

    /// A fatal I/O failure broke the journal.
    #[error("journal is broken: {0}")]
    Broken(JournalFailure),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl JournalError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Reasons `open` refuses a journal header.
///
/// Every variant is fatal to `open`; the journal is left closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    /// The header block does not start with the journal magic.
    #[error("bad header magic")]
    BadMagic,

    /// The header was written by a newer format version.
    #[error("unsupported header version {version}")]
    UnsupportedVersion {
        /// Version found on disk.
        version: u16,
    },

    /// The header checksum does not match.
    #[error("header checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    BadChecksum {
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed over the header.
        actual: u32,
    },

    /// The journal on disk belongs to somebody else.
    #[error("journal id mismatch: expected {expected}, found {found}")]
    IdMismatch {
        /// Identifier the owner opened with.
        expected: JournalId,
        /// Identifier stored in the header.
        found: JournalId,
    },

    /// The header capacity disagrees with the configuration or the store.
    #[error("capacity mismatch: header says {header}, expected {expected}")]
    CapacityMismatch {
        /// Capacity stored in the header.
        header: u64,
        /// Capacity configured or available.
        expected: u64,
    },

    /// Block size or frame alignment disagree with the configuration.
    #[error("alignment mismatch: header block {header_block}/frame {header_frame}, configured block {block}/frame {frame}")]
    AlignmentMismatch {
        /// Block size stored in the header.
        header_block: u32,
        /// Frame alignment stored in the header.
        header_frame: u32,
        /// Configured block size.
        block: u32,
        /// Configured frame alignment.
        frame: u32,
    },

    /// The header validates but its start offset is not a record boundary
    /// inside the ring.
    #[error("header start offset {start_offset} is outside the ring")]
    StartOutOfRange {
        /// Offset stored in the header.
        start_offset: u64,
    },
}

/// Terminal failure delivered to completions when the journal breaks.
///
/// Cheap to clone so one failure can resolve every outstanding completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct JournalFailure {
    reason: String,
}

impl JournalFailure {
    /// Creates a failure with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the failure reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}
