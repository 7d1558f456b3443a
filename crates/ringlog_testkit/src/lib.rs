//! # RingLog Testkit
//!
//! Test utilities for RingLog.
//!
//! This crate provides:
//! - Journal harnesses over in-memory and file stores, in every I/O mode
//! - A fault-injecting backend for write and sync failures
//! - Corruption helpers that rewrite bytes behind the journal's back
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ringlog_testkit::prelude::*;
//!
//! #[test]
//! fn replays_everything() {
//!     for mode in JournalMode::ALL {
//!         let harness = JournalHarness::memory(mode, 1 << 20);
//!         let journal = harness.create_writeable();
//!         wait_all(submit_range(&journal, 1..=10, |_| vec![7; 100]));
//!         journal.close().unwrap();
//!         assert_eq!(replay_all(&harness.open(0)).len(), 10);
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod corruption;
pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::corruption::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use corruption::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
