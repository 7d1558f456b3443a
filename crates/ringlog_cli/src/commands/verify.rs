//! Verify command implementation.

use super::{open_for_replay, CliError};
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of entries replayed.
    pub entries: usize,
    /// Total payload bytes replayed.
    pub payload_bytes: u64,
    /// First replayed sequence.
    pub first: Option<u64>,
    /// Last replayed sequence.
    pub last: Option<u64>,
    /// Why replay stopped.
    pub stopped: String,
    /// Whether replay ended at an ordinary end of log.
    pub clean: bool,
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    println!("Verifying journal at {}", path.display());
    println!();

    let (header, journal) = open_for_replay(path, 0)?;
    let mut result = VerifyResult {
        entries: 0,
        payload_bytes: 0,
        first: None,
        last: None,
        stopped: String::new(),
        clean: false,
    };

    while let Some(entry) = journal.read_entry()? {
        let sequence = entry.sequence.as_u64();
        result.entries += 1;
        result.payload_bytes += entry.payload.len() as u64;
        result.first.get_or_insert(sequence);
        result.last = Some(sequence);
    }
    if let Some(stop) = journal.replay_stop() {
        result.clean = stop.is_clean();
        result.stopped = stop.to_string();
    }
    journal.close()?;

    println!("Header:  ok (epoch {}, committed {})", header.epoch, header.committed_seq);
    println!("Entries: {} ({} payload bytes)", result.entries, result.payload_bytes);
    if let (Some(first), Some(last)) = (result.first, result.last) {
        println!("Range:   {first}..={last}");
    }
    println!("Stopped: {}", result.stopped);
    println!();

    if result.clean {
        println!("✓ Journal verification passed");
        Ok(result)
    } else {
        println!("✗ Journal verification failed");
        Err(CliError::Verification(result.stopped).into())
    }
}
