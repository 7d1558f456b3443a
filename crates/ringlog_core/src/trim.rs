//! Trim bookkeeping: mapping a commit watermark to reclaimable space.

use crate::types::SequenceNumber;
use std::collections::VecDeque;

/// Position of one live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LiveRecord {
    pub sequence: SequenceNumber,
    pub offset: u64,
    pub len: u64,
}

/// Result of advancing the watermark past at least one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reclaim {
    /// Sequence of the last record released.
    pub through: SequenceNumber,
    /// Offset of the oldest record still live, `None` if nothing is.
    pub next: Option<u64>,
    /// Records released.
    pub records: usize,
    /// Bytes released, padding included.
    pub bytes: u64,
}

/// Ordered index of live records and the owner's commit watermark.
#[derive(Debug, Default)]
pub(crate) struct TrimIndex {
    committed: SequenceNumber,
    live: VecDeque<LiveRecord>,
}

impl TrimIndex {
    pub fn new(committed: SequenceNumber) -> Self {
        Self {
            committed,
            live: VecDeque::new(),
        }
    }

    /// Rebuilds the index from replayed records, oldest first.
    pub fn from_records(committed: SequenceNumber, records: Vec<LiveRecord>) -> Self {
        Self {
            committed,
            live: records.into(),
        }
    }

    pub fn track(&mut self, record: LiveRecord) {
        debug_assert!(self
            .live
            .back()
            .map_or(true, |last| last.sequence < record.sequence));
        self.live.push_back(record);
    }

    pub fn committed(&self) -> SequenceNumber {
        self.committed
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Moves the watermark to `sequence`.
    ///
    /// Returns `None` when the watermark does not move forward or when no
    /// live record is at or below it.
    pub fn advance(&mut self, sequence: SequenceNumber) -> Option<Reclaim> {
        if sequence <= self.committed {
            return None;
        }
        self.committed = sequence;

        let mut through = None;
        let mut records = 0;
        let mut bytes = 0;
        while let Some(front) = self.live.front() {
            if front.sequence > sequence {
                break;
            }
            through = Some(front.sequence);
            records += 1;
            bytes += front.len;
            self.live.pop_front();
        }

        through.map(|through| Reclaim {
            through,
            next: self.live.front().map(|r| r.offset),
            records,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, offset: u64) -> LiveRecord {
        LiveRecord {
            sequence: SequenceNumber::new(seq),
            offset,
            len: 64,
        }
    }

    fn index() -> TrimIndex {
        let mut index = TrimIndex::new(SequenceNumber::ZERO);
        for seq in 1..=4 {
            index.track(record(seq, 4096 + (seq - 1) * 64));
        }
        index
    }

    #[test]
    fn advance_releases_prefix() {
        let mut index = index();
        let reclaim = index.advance(SequenceNumber::new(2)).unwrap();
        assert_eq!(reclaim.through, SequenceNumber::new(2));
        assert_eq!(reclaim.next, Some(4096 + 128));
        assert_eq!(reclaim.records, 2);
        assert_eq!(reclaim.bytes, 128);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn advance_past_everything() {
        let mut index = index();
        let reclaim = index.advance(SequenceNumber::new(10)).unwrap();
        assert_eq!(reclaim.through, SequenceNumber::new(4));
        assert_eq!(reclaim.next, None);
        assert!(index.is_empty());
        assert_eq!(index.committed(), SequenceNumber::new(10));
    }

    #[test]
    fn lower_or_equal_watermark_is_ignored() {
        let mut index = index();
        index.advance(SequenceNumber::new(3)).unwrap();
        assert_eq!(index.advance(SequenceNumber::new(3)), None);
        assert_eq!(index.advance(SequenceNumber::new(1)), None);
        assert_eq!(index.committed(), SequenceNumber::new(3));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn watermark_between_records_releases_nothing_new() {
        let mut index = TrimIndex::new(SequenceNumber::ZERO);
        index.track(record(10, 4096));
        assert_eq!(index.advance(SequenceNumber::new(5)), None);
        assert_eq!(index.committed(), SequenceNumber::new(5));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn rebuilt_index_keeps_order() {
        let mut index = TrimIndex::from_records(
            SequenceNumber::new(7),
            vec![record(8, 4096), record(9, 4160)],
        );
        let reclaim = index.advance(SequenceNumber::new(8)).unwrap();
        assert_eq!(reclaim.next, Some(4160));
    }
}
