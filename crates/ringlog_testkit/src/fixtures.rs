//! Journal fixtures and helpers.
//!
//! [`JournalHarness`] owns a backing store (in memory or in a temporary
//! file) and builds journals over it, so a test can write, drop the journal,
//! tamper with the bytes and reopen.

use ringlog_core::{
    Completion, Dispatcher, Entry, Journal, JournalConfig, JournalFailure, JournalId,
    SequenceNumber,
};
use ringlog_storage::{FileBackend, InMemoryBackend, IoMode, StorageBackend};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tempfile::TempDir;

/// How long helpers wait for a completion before failing the test.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Block size used by every harness.
pub const TEST_BLOCK_SIZE: u32 = 4096;

/// Receives the durability outcome of one entry.
pub type Durability = Receiver<Result<(), JournalFailure>>;

/// The I/O configurations a journal can run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Page-cache I/O with 8-byte frame alignment.
    Buffered,
    /// Block-aligned direct I/O.
    Direct,
    /// Direct I/O with batches handed to a separate I/O thread.
    DirectAsync,
}

impl JournalMode {
    /// Every mode, for tests that run the same scenario three times.
    pub const ALL: [Self; 3] = [Self::Buffered, Self::Direct, Self::DirectAsync];

    /// The backend I/O mode this journal mode needs.
    #[must_use]
    pub fn io_mode(self) -> IoMode {
        match self {
            Self::Buffered => IoMode::Buffered,
            Self::Direct | Self::DirectAsync => IoMode::Direct {
                alignment: TEST_BLOCK_SIZE as usize,
            },
        }
    }

    /// A journal configuration for this mode.
    #[must_use]
    pub fn config(self, capacity: u64) -> JournalConfig {
        JournalConfig::new()
            .capacity(capacity)
            .block_size(TEST_BLOCK_SIZE)
            .direct_io(self != Self::Buffered)
            .async_io(self == Self::DirectAsync)
    }
}

enum Store {
    Memory(InMemoryBackend),
    File { _dir: TempDir, path: PathBuf },
}

/// A backing store plus the identity and configuration of the journal that
/// lives in it.
pub struct JournalHarness {
    /// Identity every journal built by this harness uses.
    pub id: JournalId,
    /// I/O mode.
    pub mode: JournalMode,
    /// Configuration every journal built by this harness uses.
    pub config: JournalConfig,
    store: Store,
}

impl JournalHarness {
    /// A harness over an in-memory store.
    pub fn memory(mode: JournalMode, capacity: u64) -> Self {
        Self {
            id: JournalId::new(),
            mode,
            config: mode.config(capacity),
            store: Store::Memory(InMemoryBackend::with_mode(mode.io_mode())),
        }
    }

    /// A harness over a file in a fresh temporary directory.
    pub fn file(mode: JournalMode, capacity: u64) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("journal.bin");
        Self {
            id: JournalId::new(),
            mode,
            config: mode.config(capacity),
            store: Store::File { _dir: dir, path },
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: JournalConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens a fresh handle on the store.
    pub fn backend(&self) -> Box<dyn StorageBackend> {
        match &self.store {
            Store::Memory(backend) => Box::new(backend.clone()),
            Store::File { path, .. } => Box::new(
                FileBackend::open(path, self.mode.io_mode()).expect("Failed to open journal file"),
            ),
        }
    }

    /// Path of the journal file, for file harnesses.
    pub fn path(&self) -> Option<&Path> {
        match &self.store {
            Store::Memory(_) => None,
            Store::File { path, .. } => Some(path),
        }
    }

    /// Builds an unopened journal over the store.
    pub fn journal(&self) -> Journal {
        self.journal_over(self.backend())
    }

    /// Builds an unopened journal over `backend` with this harness's
    /// identity and configuration.
    pub fn journal_over(&self, backend: Box<dyn StorageBackend>) -> Journal {
        let dispatcher = Dispatcher::start("ringlog-finisher").expect("Failed to start dispatcher");
        Journal::new(self.id, backend, self.config, dispatcher).expect("Failed to build journal")
    }

    /// Creates an empty journal and makes it writeable.
    pub fn create_writeable(&self) -> Journal {
        let journal = self.journal();
        journal.create().expect("Failed to create journal");
        journal.make_writeable().expect("Failed to make journal writeable");
        journal
    }

    /// Opens the journal for replay, skipping entries up to `hint`.
    pub fn open(&self, hint: u64) -> Journal {
        let journal = self.journal();
        journal
            .open(SequenceNumber::new(hint))
            .expect("Failed to open journal");
        journal
    }

    /// Returns every byte of the store.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.store {
            Store::Memory(backend) => backend.data(),
            Store::File { path, .. } => std::fs::read(path).expect("Failed to read journal file"),
        }
    }

    /// Overwrites bytes in the store, bypassing the journal and the
    /// alignment contract.
    pub fn patch(&self, offset: u64, bytes: &[u8]) {
        match &self.store {
            Store::Memory(backend) => backend.patch(offset, bytes).expect("Patch out of bounds"),
            Store::File { path, .. } => {
                let mut file = OpenOptions::new()
                    .write(true)
                    .open(path)
                    .expect("Failed to open journal file");
                file.seek(SeekFrom::Start(offset)).expect("Failed to seek");
                file.write_all(bytes).expect("Failed to patch journal file");
                file.sync_all().expect("Failed to sync journal file");
            }
        }
    }
}

/// A deterministic payload for `sequence`, `len` bytes long.
pub fn payload(sequence: u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (sequence as usize).wrapping_mul(31).wrapping_add(i) as u8)
        .collect()
}

/// Submits one entry per sequence in `range` and returns their durability
/// receivers.
pub fn submit_range(
    journal: &Journal,
    range: RangeInclusive<u64>,
    payload_for: impl Fn(u64) -> Vec<u8>,
) -> Vec<Durability> {
    range
        .map(|sequence| {
            let (completion, durable) = Completion::channel();
            journal
                .submit_entry(SequenceNumber::new(sequence), payload_for(sequence), 0, completion)
                .expect("Failed to submit entry");
            durable
        })
        .collect()
}

/// Waits for every receiver and returns the outcomes in order.
pub fn wait_all(receivers: Vec<Durability>) -> Vec<Result<(), JournalFailure>> {
    receivers
        .into_iter()
        .map(|durable| {
            durable
                .recv_timeout(COMPLETION_TIMEOUT)
                .expect("Completion never ran")
        })
        .collect()
}

/// Waits for every receiver and asserts every entry became durable.
pub fn wait_durable(receivers: Vec<Durability>) {
    for (index, outcome) in wait_all(receivers).into_iter().enumerate() {
        assert!(outcome.is_ok(), "entry #{index} failed: {outcome:?}");
    }
}

/// Reads every remaining entry of a replaying journal.
pub fn replay_all(journal: &Journal) -> Vec<Entry> {
    std::iter::from_fn(|| journal.read_entry().expect("Replay failed")).collect()
}

/// Sequences of `entries`.
pub fn sequences(entries: &[Entry]) -> Vec<u64> {
    entries.iter().map(|entry| entry.sequence.as_u64()).collect()
}
