//! Dump command implementation.

use super::{hex_encode, open_for_replay};
use serde::Serialize;
use std::path::Path;

const PREVIEW_BYTES: usize = 16;

/// A replayed entry as printed.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Sequence number.
    pub sequence: u64,
    /// Caller flags.
    pub flags: u32,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Leading payload bytes, hex encoded.
    pub preview: String,
}

/// Result of a dump.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    /// Entries printed.
    pub entries: Vec<EntryInfo>,
    /// Why replay stopped, when it ran to its end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    from: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<DumpResult, Box<dyn std::error::Error>> {
    let (_, journal) = open_for_replay(path, from.saturating_sub(1))?;
    let max_entries = limit.unwrap_or(usize::MAX);

    let mut entries = Vec::new();
    while entries.len() < max_entries {
        let Some(entry) = journal.read_entry()? else {
            break;
        };
        let preview = &entry.payload[..entry.payload.len().min(PREVIEW_BYTES)];
        entries.push(EntryInfo {
            sequence: entry.sequence.as_u64(),
            flags: entry.flags,
            payload_size: entry.payload.len(),
            preview: hex_encode(preview),
        });
    }
    let result = DumpResult {
        entries,
        stopped: journal.replay_stop().map(|stop| stop.to_string()),
    };
    journal.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(result)
}

fn print_text_output(result: &DumpResult) {
    println!("Journal Entries ({} shown)", result.entries.len());
    println!("======================");
    println!();

    for entry in &result.entries {
        print!(
            "[{:>10}] flags={:#010x} payload={} bytes",
            entry.sequence, entry.flags, entry.payload_size
        );
        if !entry.preview.is_empty() {
            print!(" {}", entry.preview);
        }
        println!();
    }

    if let Some(stopped) = &result.stopped {
        println!();
        println!("Replay stopped: {stopped}");
    }
}
