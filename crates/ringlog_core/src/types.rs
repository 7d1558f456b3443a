//! Core type definitions for RingLog.

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

/// Caller-assigned sequence number of a journal entry.
///
/// Sequence numbers strictly increase within a journal's lifetime, across
/// reopen included. Zero is never a valid entry sequence; it marks "nothing
/// committed yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The sequence before any entry.
    pub const ZERO: Self = Self(0);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for SequenceNumber {
    fn from(seq: u64) -> Self {
        Self(seq)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identity of a journal, stored in its header and folded into every record
/// checksum.
///
/// Identifiers are 128-bit UUIDs supplied by the owner, usually the id of
/// the store the journal protects.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JournalId([u8; 16]);

impl JournalId {
    /// Creates a journal ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a new random journal ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    /// Parses a journal ID from its hyphenated UUID form.
    ///
    /// Returns `None` if the string is not a UUID.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(|u| Self(u.into_bytes()))
    }
}

impl Default for JournalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JournalId({})", self.to_uuid())
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

/// A journal entry as submitted and as replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Caller-assigned sequence number.
    pub sequence: SequenceNumber,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Opaque caller flags.
    pub flags: u32,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(sequence: SequenceNumber, payload: impl Into<Bytes>, flags: u32) -> Self {
        Self {
            sequence,
            payload: payload.into(),
            flags,
        }
    }
}

/// Lifecycle phase of a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, neither created nor opened.
    Unopened,
    /// Freshly created and empty.
    Created,
    /// Opened; entries can be read back with `read_entry`.
    Replaying,
    /// Accepting submissions.
    Writeable,
    /// `close` is draining outstanding writes.
    Closing,
    /// An unrecoverable I/O failure stopped the journal.
    Broken,
    /// Closed; may be opened again.
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unopened => "unopened",
            Self::Created => "created",
            Self::Replaying => "replaying",
            Self::Writeable => "writeable",
            Self::Closing => "closing",
            Self::Broken => "broken",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
