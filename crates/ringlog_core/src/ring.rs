//! Circular space allocator for the record region.
//!
//! The region `[region_start, region_end)` follows the header block. Records
//! are laid out back to back from `start` (oldest live record) to `write`
//! (next free byte). When a record does not fit before `region_end`, the
//! tail becomes a gap and the record goes to `region_start`:
//!
//! ```text
//! Linear:          |....[start=====write)..........|
//! WrappedWithGap:  |=====write)....[start=====)gap-|
//! ```
//!
//! The layout tag keeps "completely full" (`write == start` while wrapped)
//! distinct from "empty" (`write == start` while linear).

use thiserror::Error;

/// Shape of the live data in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingLayout {
    /// Live data is the single range `[start, write)`.
    Linear,
    /// Live data is `[start, gap_start)` followed by `[region_start, write)`.
    WrappedWithGap {
        /// First unused byte before the end of the region.
        gap_start: u64,
        /// Unused bytes up to the end of the region.
        gap_len: u64,
    },
}

/// Unused tail of the region skipped by a wrapping reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// Offset of the first skipped byte.
    pub start: u64,
    /// Number of skipped bytes.
    pub len: u64,
}

/// Space handed out for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Where the record goes.
    pub offset: u64,
    /// Bytes reserved.
    pub len: u64,
    /// Tail gap left behind when this reservation wrapped.
    pub wrap: Option<Gap>,
}

/// Not enough contiguous space until the tail is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ring full: {needed} bytes requested, {free} free")]
pub struct RingFull {
    /// Bytes requested.
    pub needed: u64,
    /// Bytes free (possibly fragmented).
    pub free: u64,
}

/// Allocator over the circular record region.
#[derive(Debug, Clone)]
pub struct RingAllocator {
    region_start: u64,
    region_end: u64,
    start: u64,
    write: u64,
    layout: RingLayout,
}

impl RingAllocator {
    /// Creates an empty ring whose first record goes to `region_start`.
    #[must_use]
    pub fn new(region_start: u64, region_end: u64) -> Self {
        Self::resume(region_start, region_end, region_start, region_start, None)
    }

    /// Rebuilds the allocator from a replayed layout.
    ///
    /// `gap` is the wrap the live data crosses, if any.
    #[must_use]
    pub fn resume(
        region_start: u64,
        region_end: u64,
        start: u64,
        write: u64,
        gap: Option<Gap>,
    ) -> Self {
        let layout = match gap {
            Some(gap) => RingLayout::WrappedWithGap {
                gap_start: gap.start,
                gap_len: gap.len,
            },
            None => RingLayout::Linear,
        };
        debug_assert!(region_start <= start && start <= region_end);
        debug_assert!(region_start <= write && write <= region_end);
        Self {
            region_start,
            region_end,
            start,
            write,
            layout,
        }
    }

    /// Offset of the oldest live record.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Offset the next record will be written at, wrap aside.
    #[must_use]
    pub const fn write_offset(&self) -> u64 {
        self.write
    }

    /// Current layout.
    #[must_use]
    pub const fn layout(&self) -> RingLayout {
        self.layout
    }

    /// First byte of the region.
    #[must_use]
    pub const fn region_start(&self) -> u64 {
        self.region_start
    }

    /// One past the last byte of the region.
    #[must_use]
    pub const fn region_end(&self) -> u64 {
        self.region_end
    }

    /// Size of the region.
    #[must_use]
    pub const fn usable(&self) -> u64 {
        self.region_end - self.region_start
    }

    /// Bytes held by live records.
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        match self.layout {
            RingLayout::Linear => self.write - self.start,
            RingLayout::WrappedWithGap { gap_start, .. } => {
                (gap_start - self.start) + (self.write - self.region_start)
            }
        }
    }

    /// Bytes neither live nor lost to the wrap gap.
    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        match self.layout {
            RingLayout::Linear => self.usable() - self.used_bytes(),
            RingLayout::WrappedWithGap { .. } => self.start - self.write,
        }
    }

    /// Returns `true` when nothing is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.layout, RingLayout::Linear) && self.start == self.write
    }

    /// Largest reservation that would succeed right now.
    #[must_use]
    pub fn largest_reservation(&self) -> u64 {
        match self.layout {
            RingLayout::Linear => {
                (self.region_end - self.write).max(self.start - self.region_start)
            }
            RingLayout::WrappedWithGap { .. } => self.start - self.write,
        }
    }

    /// Reserves `len` contiguous bytes for the next record.
    ///
    /// # Errors
    ///
    /// Returns [`RingFull`] if no contiguous run of `len` bytes is free.
    pub fn reserve(&mut self, len: u64) -> Result<Reservation, RingFull> {
        match self.layout {
            RingLayout::Linear if self.region_end - self.write >= len => {
                Ok(self.take(self.write, len, None))
            }
            RingLayout::Linear if self.start - self.region_start >= len => {
                let gap = Gap {
                    start: self.write,
                    len: self.region_end - self.write,
                };
                self.layout = RingLayout::WrappedWithGap {
                    gap_start: gap.start,
                    gap_len: gap.len,
                };
                Ok(self.take(self.region_start, len, Some(gap)))
            }
            RingLayout::WrappedWithGap { .. } if self.start - self.write >= len => {
                Ok(self.take(self.write, len, None))
            }
            _ => Err(RingFull {
                needed: len,
                free: self.free_bytes(),
            }),
        }
    }

    fn take(&mut self, offset: u64, len: u64, wrap: Option<Gap>) -> Reservation {
        self.write = offset + len;
        Reservation { offset, len, wrap }
    }

    /// Releases everything before `offset`, the position of the oldest record
    /// that stays live.
    pub fn release_to(&mut self, offset: u64) {
        if let RingLayout::WrappedWithGap { .. } = self.layout {
            if offset < self.start {
                // The new start lies past the wrap.
                self.layout = RingLayout::Linear;
            }
        }
        self.start = offset;
    }

    /// Releases every live record.
    pub fn release_all(&mut self) {
        self.layout = RingLayout::Linear;
        self.start = self.write;
    }

    /// Empties the ring and moves both ends to `offset`.
    pub fn reset(&mut self, offset: u64) {
        self.layout = RingLayout::Linear;
        self.start = offset;
        self.write = offset;
    }
}
