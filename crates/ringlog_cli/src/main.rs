//! RingLog CLI
//!
//! Command-line tools for RingLog journal files.
//!
//! # Commands
//!
//! - `create` - Create an empty journal file
//! - `inspect` - Display the journal header
//! - `dump` - Print the entries a replay would return
//! - `verify` - Replay the journal and report where and why it stops
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RingLog command-line journal tools.
#[derive(Parser)]
#[command(name = "ringlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty journal file
    Create {
        /// Total size in bytes, header block included
        #[arg(short, long, default_value = "67108864")]
        capacity: u64,

        /// Block size in bytes
        #[arg(short, long, default_value = "4096")]
        block_size: u32,

        /// Use direct (unbuffered) I/O
        #[arg(short, long)]
        direct: bool,

        /// Hand batches to a separate I/O thread (direct mode only)
        #[arg(long, requires = "direct")]
        async_io: bool,

        /// Journal identifier (random if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Display the journal header
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print replayed entries
    Dump {
        /// First sequence to print
        #[arg(long, default_value = "0")]
        from: u64,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay the journal and report why replay stops
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Create {
            capacity,
            block_size,
            direct,
            async_io,
            id,
            force,
        } => {
            let path = cli.path.ok_or("Journal path required for create")?;
            let options = commands::create::CreateOptions {
                capacity,
                block_size,
                direct,
                async_io,
                id,
                force,
            };
            commands::create::run(&path, &options)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            from,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Journal path required for dump")?;
            commands::dump::run(&path, from, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("RingLog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Journal format v{}", ringlog_core::HEADER_VERSION);
        }
    }

    Ok(())
}
