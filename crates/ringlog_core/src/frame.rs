//! Entry framing: the on-disk record format.
//!
//! ```text
//! header (32 bytes)
//!   magic     4  "RLJE"
//!   kind      1  1 = entry, 2 = wrap marker
//!   reserved  3  zero
//!   flags     4
//!   sequence  8
//!   length    4  payload length
//!   epoch     4  write epoch of the journal when the record was written
//!   crc       4  crc32(key || header[0..28])
//! payload     length bytes
//! footer (16 bytes, entries only)
//!   magic     4  "RLJF"
//!   sequence  8  copy of the header sequence
//!   crc       4  crc32(key || header || payload)
//! zero padding up to the frame alignment
//! ```
//!
//! All integers are little-endian. The key (journal id plus a per-create
//! salt) is folded into both checksums, so records left behind by another
//! journal, or by an earlier incarnation of this one, never validate.

use crate::types::{Entry, JournalId, SequenceNumber};
use bytes::Bytes;
use crc32fast::Hasher;
use ringlog_storage::align_up;
use thiserror::Error;

/// Magic bytes opening every record header.
pub const RECORD_MAGIC: [u8; 4] = *b"RLJE";

/// Magic bytes opening every record footer.
pub const FOOTER_MAGIC: [u8; 4] = *b"RLJF";

/// Size of a record header.
pub const HEADER_SIZE: usize = 32;

/// Size of a record footer.
pub const FOOTER_SIZE: usize = 16;

/// Header plus footer.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Largest payload the length field can describe.
pub const MAX_PAYLOAD: usize = u32::MAX as usize;

const HEADER_CRC_OFFSET: usize = 28;

/// Errors from decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The bytes are not a valid frame.
    #[error("corrupt frame: {reason}")]
    Corrupt {
        /// What failed to validate.
        reason: &'static str,
    },

    /// Fewer bytes are available than the frame claims.
    #[error("short read: frame needs {needed} bytes, {available} available")]
    ShortRead {
        /// Bytes the frame needs.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The payload does not fit the length field.
    #[error("payload of {len} bytes exceeds the frame limit")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
    },
}

impl FrameError {
    const fn corrupt(reason: &'static str) -> Self {
        Self::Corrupt { reason }
    }
}

/// Checksum key binding records to one journal incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKey {
    id: JournalId,
    salt: u64,
}

impl FrameKey {
    /// Creates a key from the journal id and the salt chosen at create time.
    #[must_use]
    pub const fn new(id: JournalId, salt: u64) -> Self {
        Self { id, salt }
    }

    fn hasher(&self) -> Hasher {
        let mut hasher = Hasher::new();
        hasher.update(self.id.as_bytes());
        hasher.update(&self.salt.to_le_bytes());
        hasher
    }
}

/// Kind of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A journal entry.
    Entry = 1,
    /// The rest of the ring up to its end is unused; continue at the start.
    Wrap = 2,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Entry),
            2 => Some(Self::Wrap),
            _ => None,
        }
    }

    /// Converts the frame kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A validated record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Record kind.
    pub kind: FrameKind,
    /// Caller flags.
    pub flags: u32,
    /// Entry sequence, or for a wrap marker the sequence of the record that
    /// follows it.
    pub sequence: SequenceNumber,
    /// Payload length.
    pub payload_len: u32,
    /// Write epoch.
    pub epoch: u32,
}

impl FrameHeader {
    /// On-disk size of the whole record this header opens.
    #[must_use]
    pub const fn frame_len(&self, alignment: usize) -> usize {
        match self.kind {
            FrameKind::Entry => frame_len(self.payload_len as usize, alignment),
            FrameKind::Wrap => marker_len(alignment),
        }
    }
}

/// Padded on-disk size of an entry with a payload of `payload_len` bytes.
#[must_use]
pub const fn frame_len(payload_len: usize, alignment: usize) -> usize {
    align_up(FRAME_OVERHEAD + payload_len, alignment)
}

/// Padded on-disk size of a wrap marker.
#[must_use]
pub const fn marker_len(alignment: usize) -> usize {
    align_up(HEADER_SIZE, alignment)
}

/// Encodes an entry into a padded frame.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD`].
pub fn encode(
    key: &FrameKey,
    epoch: u32,
    sequence: SequenceNumber,
    payload: &[u8],
    flags: u32,
    alignment: usize,
) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge { len: payload.len() })?;

    let total = frame_len(payload.len(), alignment);
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, key, FrameKind::Entry, flags, sequence, len, epoch);
    buf.extend_from_slice(payload);

    let mut hasher = key.hasher();
    hasher.update(&buf);
    let crc = hasher.finalize();

    buf.extend_from_slice(&FOOTER_MAGIC);
    buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.resize(total, 0);
    Ok(buf)
}

/// Encodes a wrap marker announcing that `next_sequence` lives at the start
/// of the ring.
#[must_use]
pub fn encode_wrap_marker(
    key: &FrameKey,
    epoch: u32,
    next_sequence: SequenceNumber,
    alignment: usize,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(marker_len(alignment));
    write_header(&mut buf, key, FrameKind::Wrap, 0, next_sequence, 0, epoch);
    buf.resize(marker_len(alignment), 0);
    buf
}

fn write_header(
    buf: &mut Vec<u8>,
    key: &FrameKey,
    kind: FrameKind,
    flags: u32,
    sequence: SequenceNumber,
    len: u32,
    epoch: u32,
) {
    let start = buf.len();
    buf.extend_from_slice(&RECORD_MAGIC);
    buf.push(kind.as_byte());
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&epoch.to_le_bytes());

    let mut hasher = key.hasher();
    hasher.update(&buf[start..]);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
}

/// Validates and decodes a record header.
///
/// Nothing in the header, its length included, is trusted before the
/// checksum matches.
///
/// # Errors
///
/// Returns [`FrameError::ShortRead`] if fewer than [`HEADER_SIZE`] bytes are
/// given and [`FrameError::Corrupt`] if any check fails.
pub fn decode_header(key: &FrameKey, bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::ShortRead {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    if bytes[0..4] != RECORD_MAGIC {
        return Err(FrameError::corrupt("bad record magic"));
    }

    let mut hasher = key.hasher();
    hasher.update(&bytes[..HEADER_CRC_OFFSET]);
    if hasher.finalize() != read_u32(bytes, HEADER_CRC_OFFSET) {
        return Err(FrameError::corrupt("header checksum mismatch"));
    }

    let kind = FrameKind::from_byte(bytes[4]).ok_or(FrameError::corrupt("unknown record kind"))?;
    if bytes[5..8] != [0, 0, 0] {
        return Err(FrameError::corrupt("reserved header bytes set"));
    }

    let header = FrameHeader {
        kind,
        flags: read_u32(bytes, 8),
        sequence: SequenceNumber::new(read_u64(bytes, 12)),
        payload_len: read_u32(bytes, 20),
        epoch: read_u32(bytes, 24),
    };
    if kind == FrameKind::Wrap && header.payload_len != 0 {
        return Err(FrameError::corrupt("wrap marker with payload"));
    }
    Ok(header)
}

/// Decodes a complete entry frame.
///
/// Trailing bytes past the frame (padding, or the next record) are ignored.
///
/// # Errors
///
/// Returns [`FrameError::ShortRead`] if `bytes` ends before the footer and
/// [`FrameError::Corrupt`] if the record does not validate, or is a wrap
/// marker.
pub fn decode(key: &FrameKey, bytes: &[u8]) -> Result<Entry, FrameError> {
    let header = decode_header(key, bytes)?;
    if header.kind != FrameKind::Entry {
        return Err(FrameError::corrupt("expected an entry, found a wrap marker"));
    }
    decode_body(key, &header, bytes)
}

/// Decodes the payload and footer of an entry whose header was already
/// validated with [`decode_header`].
pub(crate) fn decode_body(
    key: &FrameKey,
    header: &FrameHeader,
    bytes: &[u8],
) -> Result<Entry, FrameError> {
    let payload_end = HEADER_SIZE + header.payload_len as usize;
    let needed = payload_end + FOOTER_SIZE;
    if bytes.len() < needed {
        return Err(FrameError::ShortRead {
            needed,
            available: bytes.len(),
        });
    }

    let footer = &bytes[payload_end..needed];
    if footer[0..4] != FOOTER_MAGIC {
        return Err(FrameError::corrupt("bad footer magic"));
    }
    if read_u64(footer, 4) != header.sequence.as_u64() {
        return Err(FrameError::corrupt("footer sequence mismatch"));
    }

    let mut hasher = key.hasher();
    hasher.update(&bytes[..payload_end]);
    if hasher.finalize() != read_u32(footer, 12) {
        return Err(FrameError::corrupt("payload checksum mismatch"));
    }

    Ok(Entry {
        sequence: header.sequence,
        payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..payload_end]),
        flags: header.flags,
    })
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> FrameKey {
        FrameKey::new(JournalId::from_bytes([7; 16]), 42)
    }

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    #[test]
    fn entry_roundtrip() {
        let frame = encode(&key(), 1, seq(9), b"payload", 0xA5, 8).unwrap();
        let entry = decode(&key(), &frame).unwrap();
        assert_eq!(entry.sequence, seq(9));
        assert_eq!(&entry.payload[..], b"payload");
        assert_eq!(entry.flags, 0xA5);
    }

    #[test]
    fn frame_is_padded_to_alignment() {
        let frame = encode(&key(), 1, seq(1), b"x", 0, 512).unwrap();
        assert_eq!(frame.len(), 512);
        assert_eq!(frame.len(), frame_len(1, 512));
        assert!(frame[FRAME_OVERHEAD + 1..].iter().all(|&b| b == 0));

        let frame = encode(&key(), 1, seq(1), &[], 0, 8).unwrap();
        assert_eq!(frame.len(), FRAME_OVERHEAD);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let frame = encode(&key(), 1, seq(3), &[], 0, 8).unwrap();
        assert!(decode(&key(), &frame).unwrap().payload.is_empty());
    }

    #[test]
    fn header_reports_frame_len() {
        let frame = encode(&key(), 4, seq(5), &[1; 100], 0, 512).unwrap();
        let header = decode_header(&key(), &frame).unwrap();
        assert_eq!(header.kind, FrameKind::Entry);
        assert_eq!(header.payload_len, 100);
        assert_eq!(header.epoch, 4);
        assert_eq!(header.frame_len(512), frame.len());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let frame = encode(&key(), 1, seq(1), b"abc", 0, 8).unwrap();

        let other_id = FrameKey::new(JournalId::from_bytes([8; 16]), 42);
        assert_eq!(
            decode(&other_id, &frame),
            Err(FrameError::Corrupt {
                reason: "header checksum mismatch"
            })
        );

        let other_salt = FrameKey::new(JournalId::from_bytes([7; 16]), 43);
        assert!(decode(&other_salt, &frame).is_err());
    }

    #[test]
    fn zeroed_bytes_are_not_a_frame() {
        let zeros = [0u8; 64];
        assert_eq!(
            decode_header(&key(), &zeros),
            Err(FrameError::Corrupt {
                reason: "bad record magic"
            })
        );
    }

    #[test]
    fn truncated_frame_is_short_read() {
        let frame = encode(&key(), 1, seq(1), &[9; 40], 0, 8).unwrap();
        assert!(matches!(
            decode(&key(), &frame[..10]),
            Err(FrameError::ShortRead { needed: 32, .. })
        ));
        assert!(matches!(
            decode(&key(), &frame[..50]),
            Err(FrameError::ShortRead { .. })
        ));
    }

    #[test]
    fn payload_damage_is_detected() {
        let mut frame = encode(&key(), 1, seq(1), b"important", 0, 8).unwrap();
        frame[HEADER_SIZE + 2] ^= 0x01;
        assert_eq!(
            decode(&key(), &frame),
            Err(FrameError::Corrupt {
                reason: "payload checksum mismatch"
            })
        );
    }

    #[test]
    fn footer_sequence_must_match() {
        let mut frame = encode(&key(), 1, seq(1), b"abc", 0, 8).unwrap();
        let footer = HEADER_SIZE + 3;
        frame[footer + 4] = 2;
        assert_eq!(
            decode(&key(), &frame),
            Err(FrameError::Corrupt {
                reason: "footer sequence mismatch"
            })
        );
    }

    #[test]
    fn wrap_marker_roundtrip() {
        let marker = encode_wrap_marker(&key(), 2, seq(11), 8);
        assert_eq!(marker.len(), HEADER_SIZE);

        let header = decode_header(&key(), &marker).unwrap();
        assert_eq!(header.kind, FrameKind::Wrap);
        assert_eq!(header.sequence, seq(11));
        assert_eq!(header.frame_len(8), HEADER_SIZE);

        assert!(matches!(
            decode(&key(), &marker),
            Err(FrameError::Corrupt { .. })
        ));
    }

    #[test]
    fn wrap_marker_fills_one_block_in_direct_mode() {
        let marker = encode_wrap_marker(&key(), 1, seq(2), 4096);
        assert_eq!(marker.len(), 4096);
    }

    proptest! {
        #[test]
        fn any_flipped_bit_is_detected(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            pick in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let frame = encode(&key(), 1, seq(77), &payload, 3, 8).unwrap();
            let covered = FRAME_OVERHEAD + payload.len();
            let at = pick.index(covered);

            let mut damaged = frame.clone();
            damaged[at] ^= 1 << bit;
            prop_assert!(decode(&key(), &damaged).is_err());
        }
    }
}
