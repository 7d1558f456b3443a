//! Inspect command implementation.

use super::{format_size, read_header};
use serde::Serialize;
use std::path::Path;

/// Journal header as printed.
#[derive(Debug, Serialize)]
pub struct HeaderInfo {
    /// Journal file path.
    pub path: String,
    /// Journal identifier.
    pub id: String,
    /// Format version.
    pub version: u16,
    /// Total size in bytes.
    pub capacity: u64,
    /// Block size in bytes.
    pub block_size: u32,
    /// Frame alignment in bytes.
    pub frame_alignment: u32,
    /// Direct I/O.
    pub direct_io: bool,
    /// Separate I/O thread.
    pub async_io: bool,
    /// Write epoch.
    pub epoch: u32,
    /// Offset of the first live record.
    pub start_offset: u64,
    /// Last reclaimed sequence.
    pub committed_seq: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<HeaderInfo, Box<dyn std::error::Error>> {
    let header = read_header(path)?;
    let info = HeaderInfo {
        path: path.display().to_string(),
        id: header.id.to_string(),
        version: header.version,
        capacity: header.capacity,
        block_size: header.block_size,
        frame_alignment: header.frame_alignment,
        direct_io: header.direct_io,
        async_io: header.async_io,
        epoch: header.epoch,
        start_offset: header.start_offset,
        committed_seq: header.committed_seq.as_u64(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        _ => {
            print_text_output(&info);
        }
    }

    Ok(info)
}

fn print_text_output(info: &HeaderInfo) {
    println!("RingLog Journal");
    println!("===============");
    println!();
    println!("Path:    {}", info.path);
    println!("Id:      {}", info.id);
    println!("Version: {}", info.version);
    println!();
    println!("Geometry:");
    println!("  Capacity:        {}", format_size(info.capacity));
    println!("  Block size:      {}", info.block_size);
    println!("  Frame alignment: {}", info.frame_alignment);
    println!(
        "  I/O:             {}{}",
        if info.direct_io { "direct" } else { "buffered" },
        if info.async_io { ", async" } else { "" }
    );
    println!();
    println!("State:");
    println!("  Epoch:           {}", info.epoch);
    println!("  Start offset:    {}", info.start_offset);
    println!("  Committed seq:   {}", info.committed_seq);
}
