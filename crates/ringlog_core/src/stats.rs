//! Journal statistics.
//!
//! Counters are atomic and can be read while the journal is running.
//!
//! ```rust,ignore
//! let stats = journal.stats();
//! println!("durable entries: {}", stats.entries_durable);
//! println!("batches written: {}", stats.batches_written);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live journal counters.
#[derive(Debug, Default)]
pub struct JournalStats {
    // Submission
    entries_submitted: AtomicU64,
    bytes_submitted: AtomicU64,
    full_waits: AtomicU64,

    // I/O
    batches_written: AtomicU64,
    bytes_written: AtomicU64,
    syncs: AtomicU64,
    header_writes: AtomicU64,
    io_retries: AtomicU64,

    // Outcomes
    entries_durable: AtomicU64,
    entries_failed: AtomicU64,

    // Trim and replay
    records_reclaimed: AtomicU64,
    bytes_reclaimed: AtomicU64,
    entries_replayed: AtomicU64,
}

impl JournalStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submit(&self, frame_bytes: u64) {
        self.entries_submitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_submitted.fetch_add(frame_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_full_wait(&self) {
        self.full_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, bytes: u64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_header_write(&self) {
        self.header_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.io_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_durable(&self, entries: u64) {
        self.entries_durable.fetch_add(entries, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, entries: u64) {
        self.entries_failed.fetch_add(entries, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaim(&self, records: u64, bytes: u64) {
        self.records_reclaimed.fetch_add(records, Ordering::Relaxed);
        self.bytes_reclaimed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self) {
        self.entries_replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Entries accepted by `submit_entry`.
    pub fn entries_submitted(&self) -> u64 {
        self.entries_submitted.load(Ordering::Relaxed)
    }

    /// Entries confirmed durable.
    pub fn entries_durable(&self) -> u64 {
        self.entries_durable.load(Ordering::Relaxed)
    }

    /// Entries whose completion reported a failure.
    pub fn entries_failed(&self) -> u64 {
        self.entries_failed.load(Ordering::Relaxed)
    }

    /// Times a submitter blocked on a full ring.
    pub fn full_waits(&self) -> u64 {
        self.full_waits.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            entries_submitted: load(&self.entries_submitted),
            bytes_submitted: load(&self.bytes_submitted),
            full_waits: load(&self.full_waits),
            batches_written: load(&self.batches_written),
            bytes_written: load(&self.bytes_written),
            syncs: load(&self.syncs),
            header_writes: load(&self.header_writes),
            io_retries: load(&self.io_retries),
            entries_durable: load(&self.entries_durable),
            entries_failed: load(&self.entries_failed),
            records_reclaimed: load(&self.records_reclaimed),
            bytes_reclaimed: load(&self.bytes_reclaimed),
            entries_replayed: load(&self.entries_replayed),
        }
    }
}

/// A point-in-time copy of [`JournalStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Entries accepted by `submit_entry`.
    pub entries_submitted: u64,
    /// Frame bytes accepted, padding included.
    pub bytes_submitted: u64,
    /// Times a submitter blocked on a full ring.
    pub full_waits: u64,
    /// Write batches completed.
    pub batches_written: u64,
    /// Bytes written by completed batches, header rewrites included.
    pub bytes_written: u64,
    /// Successful syncs.
    pub syncs: u64,
    /// Header rewrites.
    pub header_writes: u64,
    /// Retried write or sync attempts.
    pub io_retries: u64,
    /// Entries confirmed durable.
    pub entries_durable: u64,
    /// Entries whose completion reported a failure.
    pub entries_failed: u64,
    /// Records released by trimming.
    pub records_reclaimed: u64,
    /// Bytes released by trimming.
    pub bytes_reclaimed: u64,
    /// Entries returned by replay.
    pub entries_replayed: u64,
}
