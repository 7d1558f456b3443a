//! Alignment-satisfying byte buffers for direct I/O.

/// A zero-initialised heap buffer whose start address and length are
/// multiples of a power-of-two alignment.
///
/// The buffer over-allocates by one alignment unit and exposes the aligned
/// window inside it. The heap allocation never moves, so the window stays
/// aligned when the buffer itself is moved between threads.
pub struct AlignedBuf {
    raw: Vec<u8>,
    start: usize,
    len: usize,
    alignment: usize,
}

impl AlignedBuf {
    /// Allocates `len` zeroed bytes aligned to `alignment`.
    ///
    /// `len` is rounded up to a multiple of `alignment`. An alignment that is
    /// zero or not a power of two is treated as 1.
    #[must_use]
    pub fn zeroed(len: usize, alignment: usize) -> Self {
        let alignment = if alignment.is_power_of_two() { alignment } else { 1 };
        let len = align_up(len, alignment);
        let raw = vec![0u8; len + alignment];
        let start = raw.as_ptr().align_offset(alignment).min(alignment);
        Self {
            raw,
            start,
            len,
            alignment,
        }
    }

    /// Copies `data` into a new aligned buffer, zero padding the tail up to
    /// the next multiple of `alignment`.
    #[must_use]
    pub fn from_bytes(data: &[u8], alignment: usize) -> Self {
        let mut buf = Self::zeroed(data.len(), alignment);
        buf.as_mut_slice()[..data.len()].copy_from_slice(data);
        buf
    }

    /// Returns the aligned window.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.raw[self.start..self.start + self.len]
    }

    /// Returns the aligned window mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.raw[self.start..self.start + self.len]
    }

    /// Length of the aligned window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The alignment this buffer honors.
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Clone for AlignedBuf {
    // A derived clone would copy `raw` into a fresh allocation with a
    // different address, losing the alignment of the window.
    fn clone(&self) -> Self {
        Self::from_bytes(self.as_slice(), self.alignment)
    }
}

impl std::fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Rounds `value` down to a multiple of `alignment` (a power of two).
#[must_use]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}
