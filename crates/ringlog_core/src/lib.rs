//! # RingLog Core
//!
//! A circular write-ahead journal.
//!
//! This crate provides:
//! - Self-validating entry frames with sequence, epoch and checksums
//! - A ring allocator over a fixed-capacity backing store
//! - A batched write pipeline with group syncs and ordered completions
//! - Crash recovery that replays exactly the intact, in-order prefix
//! - Trim-driven space reclamation with backpressure on submitters
//!
//! ## Example
//!
//! ```rust
//! use ringlog_core::{Completion, Dispatcher, Journal, JournalConfig, JournalId, SequenceNumber};
//! use ringlog_storage::InMemoryBackend;
//!
//! let backend = InMemoryBackend::new();
//! let id = JournalId::new();
//! let config = JournalConfig::new().capacity(256 * 1024);
//!
//! {
//!     let dispatcher = Dispatcher::start("finisher").unwrap();
//!     let journal = Journal::new(id, Box::new(backend.clone()), config, dispatcher).unwrap();
//!     journal.create().unwrap();
//!     journal.make_writeable().unwrap();
//!     for n in 1..=3 {
//!         journal
//!             .submit_entry(SequenceNumber::new(n), vec![n as u8; 100], 0, Completion::noop())
//!             .unwrap();
//!     }
//!     journal.close().unwrap();
//! }
//!
//! let dispatcher = Dispatcher::start("finisher").unwrap();
//! let journal = Journal::new(id, Box::new(backend), config, dispatcher).unwrap();
//! journal.open(SequenceNumber::new(1)).unwrap();
//! let replayed: Vec<u64> = std::iter::from_fn(|| journal.read_entry().unwrap())
//!     .map(|entry| entry.sequence.as_u64())
//!     .collect();
//! assert_eq!(replayed, vec![2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod config;
mod error;
pub mod frame;
mod header;
mod journal;
mod pipeline;
mod ring;
mod scanner;
mod stats;
mod trim;
mod types;

pub use bytes::Bytes;
pub use completion::{Completion, Dispatcher, GatherBuilder};
pub use config::{JournalConfig, BUFFERED_FRAME_ALIGNMENT, MIN_BLOCK_SIZE};
pub use error::{JournalError, JournalFailure, JournalResult, OpenError};
pub use frame::{FrameError, FrameHeader, FrameKey, FrameKind};
pub use header::{JournalHeader, HEADER_ENCODED_LEN, HEADER_MAGIC, HEADER_VERSION};
pub use journal::Journal;
pub use ring::{Gap, Reservation, RingAllocator, RingFull, RingLayout};
pub use scanner::ReplayStop;
pub use stats::{JournalStats, StatsSnapshot};
pub use types::{Entry, JournalId, Phase, SequenceNumber};
