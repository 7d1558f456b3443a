//! # RingLog Storage
//!
//! Backing store adapters for the RingLog journal.
//!
//! A backend is a **fixed-capacity byte region** addressed by offset. The
//! journal allocates it once, then writes and reads it in place; backends do
//! not interpret what they store.
//!
//! ## Design Principles
//!
//! - Backends are simple positional byte stores (allocate, write_at, read_at, sync)
//! - No knowledge of journal headers, records or the ring layout
//! - Must be `Send + Sync` so the journal's I/O thread can own them
//! - Two I/O modes: buffered, and direct where every request is block aligned
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral journals
//! - [`FileBackend`] - Preallocated files, optionally opened with `O_DIRECT`
//!
//! ## Example
//!
//! ```rust
//! use ringlog_storage::{AlignedBuf, InMemoryBackend, IoMode, StorageBackend};
//!
//! let mut backend = InMemoryBackend::with_mode(IoMode::Direct { alignment: 512 });
//! backend.allocate(4096).unwrap();
//!
//! let block = AlignedBuf::from_bytes(b"hello", 512);
//! backend.write_at(512, block.as_slice()).unwrap();
//! assert_eq!(&backend.read_at(512, 512).unwrap()[..5], b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aligned;
mod backend;
mod error;
mod file;
mod memory;

pub use aligned::{align_down, align_up, AlignedBuf};
pub use backend::{IoMode, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
