//! Journal header block.
//!
//! The header lives at offset 0 and fills exactly one block:
//!
//! ```text
//! magic          4  "RLJH"
//! version        2
//! flags          2  bit 0 direct I/O, bit 1 async I/O
//! id            16
//! salt           8  chosen at create time
//! capacity       8
//! block_size     4
//! frame_align    4
//! epoch          4  bumped every time a replayed journal resumes writing
//! reserved       4
//! start_offset   8  first live record
//! committed_seq  8  sequence of the last record reclaimed before start
//! crc            4  crc32 over everything above
//! zero padding to the block size
//! ```

use crate::config::JournalConfig;
use crate::error::OpenError;
use crate::frame::FrameKey;
use crate::types::{JournalId, SequenceNumber};
use ringlog_storage::AlignedBuf;
use uuid::Uuid;

/// Magic bytes opening the header block.
pub const HEADER_MAGIC: [u8; 4] = *b"RLJH";

/// Current header format version.
pub const HEADER_VERSION: u16 = 1;

/// Encoded size of the header before padding.
pub const HEADER_ENCODED_LEN: usize = 76;

const FLAG_DIRECT_IO: u16 = 1 << 0;
const FLAG_ASYNC_IO: u16 = 1 << 1;
const CRC_OFFSET: usize = HEADER_ENCODED_LEN - 4;

/// The persisted journal header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    /// Format version.
    pub version: u16,
    /// Journal was created for direct I/O.
    pub direct_io: bool,
    /// Journal was created with the async I/O thread enabled.
    pub async_io: bool,
    /// Owner-supplied identity.
    pub id: JournalId,
    /// Random value chosen at create time, folded into record checksums.
    pub salt: u64,
    /// Total size of the backing region.
    pub capacity: u64,
    /// Block size; the header occupies the first block.
    pub block_size: u32,
    /// Alignment of every frame.
    pub frame_alignment: u32,
    /// Write epoch. Records from an older epoch never follow records from a
    /// newer one.
    pub epoch: u32,
    /// Offset of the first live record.
    pub start_offset: u64,
    /// Sequence of the last record reclaimed. Every live record has a higher
    /// sequence.
    pub committed_seq: SequenceNumber,
}

impl JournalHeader {
    /// Creates the header of a fresh, empty journal.
    #[must_use]
    pub fn new(id: JournalId, config: &JournalConfig) -> Self {
        Self {
            version: HEADER_VERSION,
            direct_io: config.direct_io,
            async_io: config.async_io,
            id,
            salt: Uuid::new_v4().as_u128() as u64,
            capacity: config.capacity,
            block_size: config.block_size,
            frame_alignment: config.frame_alignment(),
            epoch: 1,
            start_offset: config.header_end(),
            committed_seq: SequenceNumber::ZERO,
        }
    }

    /// Checksum key for this journal's records.
    #[must_use]
    pub const fn key(&self) -> FrameKey {
        FrameKey::new(self.id, self.salt)
    }

    /// Offset where the ring begins.
    #[must_use]
    pub const fn header_end(&self) -> u64 {
        self.block_size as u64
    }

    /// Serializes the header (without padding).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u16;
        if self.direct_io {
            flags |= FLAG_DIRECT_IO;
        }
        if self.async_io {
            flags |= FLAG_ASYNC_IO;
        }

        let mut buf = Vec::with_capacity(HEADER_ENCODED_LEN);
        buf.extend_from_slice(&HEADER_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&self.salt.to_le_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.frame_alignment.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.start_offset.to_le_bytes());
        buf.extend_from_slice(&self.committed_seq.as_u64().to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Serializes the header into a full, aligned block ready to be written
    /// at offset 0.
    #[must_use]
    pub fn encode_block(&self, alignment: usize) -> AlignedBuf {
        let mut block = AlignedBuf::zeroed(self.block_size as usize, alignment);
        block.as_mut_slice()[..HEADER_ENCODED_LEN].copy_from_slice(&self.encode());
        block
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// Returns [`OpenError::BadMagic`], [`OpenError::UnsupportedVersion`] or
    /// [`OpenError::BadChecksum`].
    pub fn decode(bytes: &[u8]) -> Result<Self, OpenError> {
        if bytes.len() < HEADER_ENCODED_LEN || bytes[0..4] != HEADER_MAGIC {
            return Err(OpenError::BadMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > HEADER_VERSION {
            return Err(OpenError::UnsupportedVersion { version });
        }

        let expected = read_u32(bytes, CRC_OFFSET);
        let actual = crc32fast::hash(&bytes[..CRC_OFFSET]);
        if expected != actual {
            return Err(OpenError::BadChecksum { expected, actual });
        }

        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[8..24]);

        Ok(Self {
            version,
            direct_io: flags & FLAG_DIRECT_IO != 0,
            async_io: flags & FLAG_ASYNC_IO != 0,
            id: JournalId::from_bytes(id),
            salt: read_u64(bytes, 24),
            capacity: read_u64(bytes, 32),
            block_size: read_u32(bytes, 40),
            frame_alignment: read_u32(bytes, 44),
            epoch: read_u32(bytes, 48),
            start_offset: read_u64(bytes, 56),
            committed_seq: SequenceNumber::new(read_u64(bytes, 64)),
        })
    }

    /// Checks that this header belongs to the journal being opened.
    ///
    /// # Errors
    ///
    /// Returns the first mismatch between the header, the owner's id, the
    /// configuration and the size of the backing store.
    pub fn check_compatible(
        &self,
        id: JournalId,
        config: &JournalConfig,
        backend_capacity: u64,
    ) -> Result<(), OpenError> {
        if self.id != id {
            return Err(OpenError::IdMismatch {
                expected: id,
                found: self.id,
            });
        }
        if self.capacity != config.capacity {
            return Err(OpenError::CapacityMismatch {
                header: self.capacity,
                expected: config.capacity,
            });
        }
        if self.capacity > backend_capacity {
            return Err(OpenError::CapacityMismatch {
                header: self.capacity,
                expected: backend_capacity,
            });
        }
        if self.block_size != config.block_size || self.frame_alignment != config.frame_alignment() {
            return Err(OpenError::AlignmentMismatch {
                header_block: self.block_size,
                header_frame: self.frame_alignment,
                block: config.block_size,
                frame: config.frame_alignment(),
            });
        }
        if self.start_offset < self.header_end()
            || self.start_offset > self.capacity
            || self.start_offset % u64::from(self.frame_alignment) != 0
        {
            return Err(OpenError::StartOutOfRange {
                start_offset: self.start_offset,
            });
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
