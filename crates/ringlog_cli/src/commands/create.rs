//! Create command implementation.

use super::{io_mode, CliError};
use ringlog_core::{Dispatcher, Journal, JournalConfig, JournalError, JournalId};
use ringlog_storage::FileBackend;
use std::path::Path;

/// Options of the create command.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Total size in bytes.
    pub capacity: u64,
    /// Block size in bytes.
    pub block_size: u32,
    /// Direct I/O.
    pub direct: bool,
    /// Separate I/O thread.
    pub async_io: bool,
    /// Identifier; random when `None`.
    pub id: Option<String>,
    /// Overwrite an existing file.
    pub force: bool,
}

/// Runs the create command and returns the new journal's identifier.
pub fn run(path: &Path, options: &CreateOptions) -> Result<JournalId, Box<dyn std::error::Error>> {
    if path.exists() {
        if !options.force {
            return Err(CliError::Exists(path.display().to_string()).into());
        }
        std::fs::remove_file(path)?;
    }

    let id = match &options.id {
        Some(text) => JournalId::parse(text).ok_or_else(|| {
            JournalError::invalid_config(format!("{text} is not a valid journal id"))
        })?,
        None => JournalId::new(),
    };
    let config = JournalConfig::new()
        .capacity(options.capacity)
        .block_size(options.block_size)
        .direct_io(options.direct)
        .async_io(options.async_io);
    config.validate()?;

    let backend = FileBackend::open_with_create_dirs(path, io_mode(options.direct, options.block_size))?;
    let dispatcher = Dispatcher::start("ringlog-cli")?;
    let journal = Journal::new(id, Box::new(backend), config, dispatcher)?;
    journal.create()?;
    journal.close()?;

    println!("Created journal {id} at {}", path.display());
    println!(
        "  capacity {} bytes, block size {}, {} I/O",
        options.capacity,
        options.block_size,
        if options.direct { "direct" } else { "buffered" }
    );
    Ok(id)
}
