//! Corruption helpers.
//!
//! These rewrite stored bytes behind the journal's back to simulate torn
//! writes and media damage.

use crate::fixtures::JournalHarness;
use ringlog_storage::InMemoryBackend;

/// A store whose bytes can be read and overwritten directly.
pub trait Tamper {
    /// Returns every byte of the store.
    fn snapshot(&self) -> Vec<u8>;

    /// Overwrites bytes at `offset`.
    fn overwrite(&self, offset: u64, bytes: &[u8]);
}

impl Tamper for InMemoryBackend {
    fn snapshot(&self) -> Vec<u8> {
        self.data()
    }

    fn overwrite(&self, offset: u64, bytes: &[u8]) {
        self.patch(offset, bytes).expect("Patch out of bounds");
    }
}

impl Tamper for JournalHarness {
    fn snapshot(&self) -> Vec<u8> {
        self.bytes()
    }

    fn overwrite(&self, offset: u64, bytes: &[u8]) {
        self.patch(offset, bytes);
    }
}

/// Offsets of every occurrence of `needle` in `haystack`.
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<u64> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(offset, _)| offset as u64)
        .collect()
}

/// Replaces every occurrence of `needle` with `replacement` (same length)
/// and returns how many were replaced.
pub fn replace_needle(store: &impl Tamper, needle: &[u8], replacement: &[u8]) -> usize {
    assert_eq!(
        needle.len(),
        replacement.len(),
        "replacement must be as long as the needle"
    );
    let offsets = find_all(&store.snapshot(), needle);
    for &offset in &offsets {
        store.overwrite(offset, replacement);
    }
    offsets.len()
}

/// Inverts every bit of the byte at `offset`.
pub fn flip_byte(store: &impl Tamper, offset: u64) {
    let original = store.snapshot()[offset as usize];
    store.overwrite(offset, &[!original]);
}

/// Zeroes `len` bytes at `offset`, as if a write never reached the media.
pub fn zero_range(store: &impl Tamper, offset: u64, len: usize) {
    store.overwrite(offset, &vec![0u8; len]);
}
