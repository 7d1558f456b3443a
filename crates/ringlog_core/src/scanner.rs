//! Recovery scanner: reads live records back after a restart.
//!
//! The scan starts at the header's `start_offset` and walks records in ring
//! order. It stops, without surfacing anything further, at the first record
//! that fails to validate, a record whose sequence does not increase (left
//! over from an earlier lap), a record from an older write epoch, or after
//! one full ring length.

use crate::error::JournalResult;
use crate::frame::{self, FrameError, FrameKey, FrameKind, HEADER_SIZE, RECORD_MAGIC};
use crate::header::JournalHeader;
use crate::ring::Gap;
use crate::trim::LiveRecord;
use crate::types::{Entry, SequenceNumber};
use parking_lot::Mutex;
use ringlog_storage::{align_up, StorageBackend};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Why a replay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStop {
    /// Reached bytes never written since the journal was created.
    Unwritten {
        /// Offset of the blank record slot.
        offset: u64,
    },
    /// The slot holds bytes that do not start a record, typically the
    /// middle of an older record the ring has since written over.
    EndOfLog {
        /// Offset of the slot.
        offset: u64,
    },
    /// A record failed validation (torn write or media corruption).
    Corrupt {
        /// Offset of the record.
        offset: u64,
        /// What failed.
        reason: &'static str,
    },
    /// A record claims more bytes than the region has left.
    ShortRead {
        /// Offset of the record.
        offset: u64,
        /// Bytes the record needs.
        needed: u64,
        /// Bytes left before the end of the region.
        available: u64,
    },
    /// A valid record whose sequence does not follow the previous one.
    Stale {
        /// Offset of the record.
        offset: u64,
        /// Its sequence.
        sequence: SequenceNumber,
    },
    /// A valid record written before the journal last resumed writing.
    OlderEpoch {
        /// Offset of the record.
        offset: u64,
        /// Its epoch.
        epoch: u32,
    },
    /// One full ring length was scanned.
    Exhausted,
}

impl ReplayStop {
    /// Returns `true` if replay ended at an ordinary end of log rather than
    /// at a damaged record.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(
            self,
            Self::Unwritten { .. }
                | Self::EndOfLog { .. }
                | Self::Stale { .. }
                | Self::OlderEpoch { .. }
                | Self::Exhausted
        )
    }

    fn from_frame_error(offset: u64, err: FrameError) -> Self {
        match err {
            FrameError::Corrupt { reason } => Self::Corrupt { offset, reason },
            FrameError::ShortRead { needed, available } => Self::ShortRead {
                offset,
                needed: needed as u64,
                available: available as u64,
            },
            FrameError::PayloadTooLarge { .. } => Self::Corrupt {
                offset,
                reason: "payload too large",
            },
        }
    }
}

impl fmt::Display for ReplayStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unwritten { offset } => write!(f, "end of log at offset {offset}"),
            Self::EndOfLog { offset } => {
                write!(f, "end of log at offset {offset} (no record header)")
            }
            Self::Corrupt { offset, reason } => {
                write!(f, "corrupt record at offset {offset}: {reason}")
            }
            Self::ShortRead {
                offset,
                needed,
                available,
            } => write!(
                f,
                "record at offset {offset} needs {needed} bytes, {available} left"
            ),
            Self::Stale { offset, sequence } => {
                write!(f, "stale record {sequence} at offset {offset}")
            }
            Self::OlderEpoch { offset, epoch } => {
                write!(f, "record from older epoch {epoch} at offset {offset}")
            }
            Self::Exhausted => f.write_str("scanned the whole ring"),
        }
    }
}

/// Everything `make_writeable` needs to resume after a scan.
#[derive(Debug)]
pub(crate) struct ScanOutcome {
    pub start: u64,
    pub end: u64,
    pub gap: Option<Gap>,
    pub live: Vec<LiveRecord>,
    pub last_sequence: SequenceNumber,
    pub stop: ReplayStop,
}

pub(crate) struct Scanner {
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    key: FrameKey,
    alignment: usize,
    io_alignment: usize,
    region_start: u64,
    region_end: u64,
    start: u64,
    pos: u64,
    scanned: u64,
    end: u64,
    gap: Option<Gap>,
    pending_gap: Option<Gap>,
    expect_after_wrap: Option<SequenceNumber>,
    last_sequence: SequenceNumber,
    last_epoch: u32,
    max_epoch: u32,
    skip_through: SequenceNumber,
    live: Vec<LiveRecord>,
    stop: Option<ReplayStop>,
}

impl Scanner {
    /// Positions a scanner at the header's start offset. Entries at or below
    /// `skip_through` are validated but not returned.
    pub fn new(
        backend: Arc<Mutex<Box<dyn StorageBackend>>>,
        header: &JournalHeader,
        io_alignment: usize,
        skip_through: SequenceNumber,
    ) -> Self {
        Self {
            backend,
            key: header.key(),
            alignment: header.frame_alignment as usize,
            io_alignment: io_alignment.max(1),
            region_start: header.header_end(),
            region_end: header.capacity,
            start: header.start_offset,
            pos: header.start_offset,
            scanned: 0,
            end: header.start_offset,
            gap: None,
            pending_gap: None,
            expect_after_wrap: None,
            last_sequence: header.committed_seq,
            last_epoch: 0,
            max_epoch: header.epoch,
            skip_through,
            live: Vec::new(),
            stop: None,
        }
    }

    /// Returns the next entry above the skip point, or `None` once replay
    /// has stopped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backing store fails.
    pub fn next_entry(&mut self) -> JournalResult<Option<Entry>> {
        while self.stop.is_none() {
            if let Some(entry) = self.step()? {
                if entry.sequence > self.skip_through {
                    return Ok(Some(entry));
                }
                trace!(sequence = %entry.sequence, "skipping already applied entry");
            }
        }
        Ok(None)
    }

    pub fn stop_reason(&self) -> Option<&ReplayStop> {
        self.stop.as_ref()
    }

    /// Scans whatever is left and returns the resume state.
    pub fn finish(mut self) -> JournalResult<ScanOutcome> {
        while self.stop.is_none() {
            self.step()?;
        }
        Ok(ScanOutcome {
            start: self.start,
            end: self.end,
            gap: self.gap,
            live: self.live,
            last_sequence: self.last_sequence,
            stop: self.stop.unwrap_or(ReplayStop::Exhausted),
        })
    }

    /// Reads one record. Returns `None` after a wrap or when replay stops.
    fn step(&mut self) -> JournalResult<Option<Entry>> {
        if self.scanned >= self.region_end - self.region_start {
            return Ok(self.halt(ReplayStop::Exhausted));
        }

        let offset = self.pos;
        let remaining = self.region_end - offset;
        if remaining < HEADER_SIZE as u64 {
            self.wrap(offset, None);
            return Ok(None);
        }

        let head = self.read(offset, HEADER_SIZE)?;
        let header = match frame::decode_header(&self.key, &head) {
            Ok(header) => header,
            Err(_) if head.iter().all(|&b| b == 0) => {
                return Ok(self.halt(ReplayStop::Unwritten { offset }));
            }
            // A matching magic with a bad checksum is damage; anything else
            // is leftover bytes from an earlier lap.
            Err(_) if head[..RECORD_MAGIC.len()] != RECORD_MAGIC => {
                return Ok(self.halt(ReplayStop::EndOfLog { offset }));
            }
            Err(err) => return Ok(self.halt(ReplayStop::from_frame_error(offset, err))),
        };

        if header.sequence <= self.last_sequence {
            return Ok(self.halt(ReplayStop::Stale {
                offset,
                sequence: header.sequence,
            }));
        }
        if header.epoch < self.last_epoch {
            return Ok(self.halt(ReplayStop::OlderEpoch {
                offset,
                epoch: header.epoch,
            }));
        }
        if header.epoch > self.max_epoch {
            return Ok(self.halt(ReplayStop::Corrupt {
                offset,
                reason: "record epoch is newer than the header",
            }));
        }
        if let Some(expected) = self.expect_after_wrap {
            if header.kind != FrameKind::Entry || header.sequence != expected {
                return Ok(self.halt(ReplayStop::Corrupt {
                    offset,
                    reason: "record after wrap marker does not match it",
                }));
            }
        }
        if header.kind == FrameKind::Wrap {
            self.wrap(offset, Some(header.sequence));
            return Ok(None);
        }

        let len = header.frame_len(self.alignment) as u64;
        if len > remaining {
            return Ok(self.halt(ReplayStop::ShortRead {
                offset,
                needed: len,
                available: remaining,
            }));
        }

        let bytes = self.read(offset, len as usize)?;
        let entry = match frame::decode_body(&self.key, &header, &bytes) {
            Ok(entry) => entry,
            Err(err) => return Ok(self.halt(ReplayStop::from_frame_error(offset, err))),
        };

        self.pos = offset + len;
        self.scanned += len;
        self.end = self.pos;
        if let Some(gap) = self.pending_gap.take() {
            self.gap = Some(gap);
        }
        self.expect_after_wrap = None;
        self.last_sequence = entry.sequence;
        self.last_epoch = header.epoch;
        self.live.push(LiveRecord {
            sequence: entry.sequence,
            offset,
            len,
        });
        Ok(Some(entry))
    }

    fn wrap(&mut self, gap_start: u64, next: Option<SequenceNumber>) {
        if self.gap.is_some() || self.pending_gap.is_some() {
            self.halt(ReplayStop::Exhausted);
            return;
        }
        let gap = Gap {
            start: gap_start,
            len: self.region_end - gap_start,
        };
        trace!(gap_start, gap_len = gap.len, marked = next.is_some(), "replay wrapped");
        self.pending_gap = Some(gap);
        self.expect_after_wrap = next;
        self.scanned += gap.len;
        self.pos = self.region_start;
    }

    fn halt(&mut self, stop: ReplayStop) -> Option<Entry> {
        debug!(%stop, records = self.live.len(), "replay stopped");
        self.stop = Some(stop);
        None
    }

    fn read(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
        let aligned = align_up(len, self.io_alignment);
        let mut bytes = self.backend.lock().read_at(offset, aligned)?;
        bytes.truncate(len);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::types::JournalId;
    use ringlog_storage::InMemoryBackend;

    const BLOCK: u64 = 4096;

    struct Fixture {
        header: JournalHeader,
        backend: InMemoryBackend,
    }

    impl Fixture {
        fn new(capacity: u64) -> Self {
            let config = JournalConfig::new().capacity(capacity).block_size(BLOCK as u32);
            let header = JournalHeader::new(JournalId::new(), &config);
            let mut backend = InMemoryBackend::new();
            backend.allocate(capacity).unwrap();
            backend.write_at(0, &header.encode()).unwrap();
            Self { header, backend }
        }

        fn put(&mut self, offset: u64, seq: u64, payload: &[u8]) -> u64 {
            self.put_epoch(offset, seq, payload, self.header.epoch)
        }

        fn put_epoch(&mut self, offset: u64, seq: u64, payload: &[u8], epoch: u32) -> u64 {
            let bytes = frame::encode(
                &self.header.key(),
                epoch,
                SequenceNumber::new(seq),
                payload,
                0,
                8,
            )
            .unwrap();
            self.backend.write_at(offset, &bytes).unwrap();
            offset + bytes.len() as u64
        }

        fn marker(&mut self, offset: u64, next: u64) {
            let bytes = frame::encode_wrap_marker(
                &self.header.key(),
                self.header.epoch,
                SequenceNumber::new(next),
                8,
            );
            self.backend.write_at(offset, &bytes).unwrap();
        }

        fn scanner(&self, skip: u64) -> Scanner {
            let backend: Box<dyn StorageBackend> = Box::new(self.backend.clone());
            Scanner::new(
                Arc::new(Mutex::new(backend)),
                &self.header,
                1,
                SequenceNumber::new(skip),
            )
        }
    }

    fn drain(scanner: &mut Scanner) -> Vec<u64> {
        let mut seqs = Vec::new();
        while let Some(entry) = scanner.next_entry().unwrap() {
            seqs.push(entry.sequence.as_u64());
        }
        seqs
    }

    #[test]
    fn empty_journal_stops_at_unwritten() {
        let fixture = Fixture::new(16 * BLOCK);
        let mut scanner = fixture.scanner(0);
        assert!(drain(&mut scanner).is_empty());
        assert_eq!(
            scanner.stop_reason(),
            Some(&ReplayStop::Unwritten { offset: BLOCK })
        );
    }

    #[test]
    fn replays_in_order() {
        let mut fixture = Fixture::new(16 * BLOCK);
        let mut offset = BLOCK;
        for seq in 1..=5 {
            offset = fixture.put(offset, seq, format!("entry {seq}").as_bytes());
        }

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1, 2, 3, 4, 5]);

        let outcome = scanner.finish().unwrap();
        assert_eq!(outcome.end, offset);
        assert_eq!(outcome.live.len(), 5);
        assert_eq!(outcome.last_sequence, SequenceNumber::new(5));
        assert!(outcome.gap.is_none());
    }

    #[test]
    fn hint_skips_applied_entries() {
        let mut fixture = Fixture::new(16 * BLOCK);
        let mut offset = BLOCK;
        for seq in 1..=3 {
            offset = fixture.put(offset, seq, b"x");
        }

        let mut scanner = fixture.scanner(1);
        assert_eq!(drain(&mut scanner), vec![2, 3]);
        assert_eq!(scanner.finish().unwrap().live.len(), 3);
    }

    #[test]
    fn stops_at_corrupt_record() {
        let mut fixture = Fixture::new(16 * BLOCK);
        let mut offsets = vec![BLOCK];
        for seq in 1..=4 {
            let next = fixture.put(*offsets.last().unwrap(), seq, b"needle in a haystack");
            offsets.push(next);
        }
        fixture.backend.patch(offsets[2] + 40, b"NEEDLE").unwrap();

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1, 2]);
        assert!(matches!(
            scanner.stop_reason(),
            Some(ReplayStop::Corrupt { offset, .. }) if *offset == offsets[2]
        ));
        assert_eq!(scanner.finish().unwrap().end, offsets[2]);
    }

    #[test]
    fn leftover_bytes_end_the_log_cleanly() {
        let mut fixture = Fixture::new(16 * BLOCK);
        let offset = fixture.put(BLOCK, 1, b"short");
        // The tail of an older, longer record.
        fixture.backend.patch(offset, &[0x5A; 64]).unwrap();

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1]);
        assert_eq!(scanner.stop_reason(), Some(&ReplayStop::EndOfLog { offset }));
        assert!(scanner.stop_reason().unwrap().is_clean());
    }

    #[test]
    fn damaged_record_header_is_not_clean() {
        let mut fixture = Fixture::new(16 * BLOCK);
        let offset = fixture.put(BLOCK, 1, b"first");
        fixture.put(offset, 2, b"second");
        fixture.backend.patch(offset + 12, &[0xFF]).unwrap();

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1]);
        assert!(matches!(
            scanner.stop_reason(),
            Some(ReplayStop::Corrupt { reason: "header checksum mismatch", .. })
        ));
    }

    #[test]
    fn stops_at_stale_record() {
        let mut fixture = Fixture::new(16 * BLOCK);
        let offset = fixture.put(BLOCK, 10, b"new lap");
        fixture.put(offset, 3, b"old lap");

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![10]);
        assert!(matches!(
            scanner.stop_reason(),
            Some(ReplayStop::Stale { sequence, .. }) if sequence.as_u64() == 3
        ));
    }

    #[test]
    fn stops_at_older_epoch() {
        let mut fixture = Fixture::new(16 * BLOCK);
        fixture.header.epoch = 2;
        let offset = fixture.put_epoch(BLOCK, 1, b"resumed", 2);
        fixture.put_epoch(offset, 2, b"left behind", 1);

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1]);
        assert!(matches!(
            scanner.stop_reason(),
            Some(ReplayStop::OlderEpoch { epoch: 1, .. })
        ));
    }

    #[test]
    fn follows_wrap_marker() {
        let mut fixture = Fixture::new(4 * BLOCK);
        let tail = 4 * BLOCK - 1000;
        fixture.header.start_offset = tail;
        fixture.header.committed_seq = SequenceNumber::new(6);
        let after = fixture.put(tail, 7, &[7; 200]);
        fixture.marker(after, 8);
        let end = fixture.put(BLOCK, 8, &[8; 300]);

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![7, 8]);

        let outcome = scanner.finish().unwrap();
        assert_eq!(outcome.end, end);
        assert_eq!(
            outcome.gap,
            Some(Gap {
                start: after,
                len: 4 * BLOCK - after
            })
        );
    }

    #[test]
    fn wraps_implicitly_before_tiny_tail() {
        let mut fixture = Fixture::new(4 * BLOCK);
        let tail = 4 * BLOCK - 72;
        fixture.header.start_offset = tail;
        let after = fixture.put(tail, 1, &[1; 8]);
        assert_eq!(4 * BLOCK - after, 16);
        fixture.put(BLOCK, 2, b"wrapped");

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1, 2]);
        assert_eq!(scanner.finish().unwrap().gap.map(|g| g.len), Some(16));
    }

    #[test]
    fn marker_with_bad_follow_up_stops_before_marker() {
        let mut fixture = Fixture::new(4 * BLOCK);
        let tail = 4 * BLOCK - 1000;
        fixture.header.start_offset = tail;
        let after = fixture.put(tail, 1, &[1; 100]);
        fixture.marker(after, 2);
        fixture.put(BLOCK, 5, b"not the announced record");

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1]);
        let outcome = scanner.finish().unwrap();
        assert_eq!(outcome.end, after);
        assert!(outcome.gap.is_none());
        assert!(!outcome.stop.is_clean());
    }

    #[test]
    fn full_ring_is_scanned_once() {
        let mut fixture = Fixture::new(2 * BLOCK);
        let payload = vec![0xAB; 1024 - 48];
        let mut offset = BLOCK;
        for seq in 1..=4 {
            offset = fixture.put(offset, seq, &payload);
        }
        assert_eq!(offset, 2 * BLOCK);

        let mut scanner = fixture.scanner(0);
        assert_eq!(drain(&mut scanner), vec![1, 2, 3, 4]);
        assert_eq!(scanner.stop_reason(), Some(&ReplayStop::Exhausted));
    }

    #[test]
    fn records_from_another_journal_do_not_replay() {
        let mut fixture = Fixture::new(16 * BLOCK);
        fixture.put(BLOCK, 1, b"mine");

        let config = JournalConfig::new().capacity(16 * BLOCK).block_size(BLOCK as u32);
        fixture.header = JournalHeader::new(fixture.header.id, &config);

        let mut scanner = fixture.scanner(0);
        assert!(drain(&mut scanner).is_empty());
        assert!(matches!(
            scanner.stop_reason(),
            Some(ReplayStop::Corrupt { .. })
        ));
    }
}
