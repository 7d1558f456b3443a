//! CLI command implementations.

pub mod create;
pub mod dump;
pub mod inspect;
pub mod verify;

use ringlog_core::{
    Dispatcher, Journal, JournalConfig, JournalHeader, SequenceNumber, HEADER_ENCODED_LEN,
};
use ringlog_storage::{FileBackend, IoMode, StorageBackend};
use std::path::Path;
use thiserror::Error;

/// Errors raised by the CLI itself, on top of the library errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// No journal file at the given path.
    #[error("no journal found at {0}")]
    NotFound(String),

    /// The file is too short to hold a journal header.
    #[error("{0} is not a journal file")]
    NotAJournal(String),

    /// Refusing to overwrite an existing file.
    #[error("{0} already exists (use --force to overwrite)")]
    Exists(String),

    /// The journal failed verification.
    #[error("verification failed: {0}")]
    Verification(String),
}

/// Reads and validates the header of the journal file at `path`.
pub(crate) fn read_header(path: &Path) -> Result<JournalHeader, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(CliError::NotFound(path.display().to_string()).into());
    }
    let backend = FileBackend::open(path, IoMode::Buffered)?;
    if backend.capacity() < HEADER_ENCODED_LEN as u64 {
        return Err(CliError::NotAJournal(path.display().to_string()).into());
    }
    let bytes = backend.read_at(0, HEADER_ENCODED_LEN)?;
    Ok(JournalHeader::decode(&bytes)?)
}

/// Builds the configuration a journal was created with.
pub(crate) fn config_from(header: &JournalHeader) -> JournalConfig {
    JournalConfig::new()
        .capacity(header.capacity)
        .block_size(header.block_size)
        .direct_io(header.direct_io)
        .async_io(header.async_io)
}

pub(crate) fn io_mode(direct: bool, block_size: u32) -> IoMode {
    if direct {
        IoMode::Direct {
            alignment: block_size as usize,
        }
    } else {
        IoMode::Buffered
    }
}

/// Opens the journal at `path` for replay. Entries up to `hint` are skipped.
pub(crate) fn open_for_replay(
    path: &Path,
    hint: u64,
) -> Result<(JournalHeader, Journal), Box<dyn std::error::Error>> {
    let header = read_header(path)?;
    let backend = FileBackend::open(path, io_mode(header.direct_io, header.block_size))?;
    let dispatcher = Dispatcher::start("ringlog-cli")?;
    let journal = Journal::new(header.id, Box::new(backend), config_from(&header), dispatcher)?;
    journal.open(SequenceNumber::new(hint))?;
    Ok((header, journal))
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::create::{self, CreateOptions};
    use ringlog_core::{Completion, Dispatcher, Journal, SequenceNumber};
    use ringlog_storage::{FileBackend, IoMode};
    use std::ops::RangeInclusive;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Creates a small buffered journal in a temp dir.
    pub fn created_journal(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("journal.bin");
        create::run(&path, &small(false)).unwrap();
        path
    }

    pub fn small(force: bool) -> CreateOptions {
        CreateOptions {
            capacity: 256 * 1024,
            block_size: 4096,
            direct: false,
            async_io: false,
            id: None,
            force,
        }
    }

    /// Writes `count` entries of varying size, waiting for each and
    /// trimming all but the newest four, so the ring laps several times.
    pub fn churn_entries(path: &Path, count: u64) {
        let journal = writeable(path);
        for seq in 1..=count {
            let len = 300 + (seq * 7919 % 1700) as usize;
            let (done, durable) = Completion::channel();
            journal
                .submit_entry(SequenceNumber::new(seq), vec![seq as u8; len], 0, done)
                .unwrap();
            durable.recv().unwrap().unwrap();
            if seq > 4 {
                journal.committed_thru(SequenceNumber::new(seq - 4)).unwrap();
            }
        }
        journal.close().unwrap();
    }

    /// Appends `entry N` payloads to a buffered journal file.
    pub fn append_entries(path: &Path, range: RangeInclusive<u64>) {
        let journal = writeable(path);
        for seq in range {
            let payload = format!("entry {seq}").into_bytes();
            journal
                .submit_entry(SequenceNumber::new(seq), payload, 0, Completion::noop())
                .unwrap();
        }
        journal.close().unwrap();
    }

    fn writeable(path: &Path) -> Journal {
        let header = super::read_header(path).unwrap();
        let backend = FileBackend::open(path, IoMode::Buffered).unwrap();
        let dispatcher = Dispatcher::start("cli-test").unwrap();
        let journal = Journal::new(
            header.id,
            Box::new(backend),
            super::config_from(&header),
            dispatcher,
        )
        .unwrap();
        journal.open(SequenceNumber::ZERO).unwrap();
        while journal.read_entry().unwrap().is_some() {}
        journal.make_writeable().unwrap();
        journal
    }
}
