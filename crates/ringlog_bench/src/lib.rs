//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use ringlog_core::{Dispatcher, Journal, JournalConfig, JournalId};
use ringlog_storage::{InMemoryBackend, IoMode};

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random payloads of `size` bytes each.
pub fn generate_payloads(count: usize, size: usize) -> Vec<Vec<u8>> {
    (0..count).map(|_| random_data(size)).collect()
}

/// A writeable in-memory journal.
///
/// # Panics
///
/// Panics if the journal cannot be built; benchmarks have no way to recover.
pub fn memory_journal(config: JournalConfig) -> Journal {
    let mode = if config.direct_io {
        IoMode::Direct {
            alignment: config.block_size as usize,
        }
    } else {
        IoMode::Buffered
    };
    let dispatcher = Dispatcher::start("bench-finisher").expect("dispatcher");
    let journal = Journal::new(
        JournalId::new(),
        Box::new(InMemoryBackend::with_mode(mode)),
        config,
        dispatcher,
    )
    .expect("journal");
    journal.create().expect("create");
    journal.make_writeable().expect("make writeable");
    journal
}
