//! Fault injection for the journal's I/O path.
//!
//! [`FaultyBackend`] wraps any backend and fails writes or syncs on demand.
//! The [`FaultPlan`] handle stays with the test after the backend has been
//! moved into a journal, so faults can be armed mid-run.
//!
//! ## Usage
//!
//! ```rust
//! use ringlog_storage::{InMemoryBackend, StorageBackend};
//! use ringlog_testkit::FaultyBackend;
//!
//! let (mut backend, plan) = FaultyBackend::wrap(Box::new(InMemoryBackend::new()));
//! backend.allocate(4096).unwrap();
//! plan.fail_writes_after(1);
//! assert!(backend.write_at(0, b"ok").is_ok());
//! assert!(backend.write_at(0, b"no").is_err());
//! ```

use ringlog_storage::{IoMode, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Faults {
    writes_allowed: AtomicUsize,
    syncs_allowed: AtomicUsize,
    transient_writes: AtomicUsize,
    writes: AtomicUsize,
    syncs: AtomicUsize,
    tripped: AtomicBool,
}

/// Controls the faults of a [`FaultyBackend`].
#[derive(Debug, Clone)]
pub struct FaultPlan {
    inner: Arc<Faults>,
}

impl FaultPlan {
    fn new() -> Self {
        Self {
            inner: Arc::new(Faults {
                writes_allowed: AtomicUsize::new(usize::MAX),
                syncs_allowed: AtomicUsize::new(usize::MAX),
                transient_writes: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                syncs: AtomicUsize::new(0),
                tripped: AtomicBool::new(false),
            }),
        }
    }

    /// Lets `count` more writes succeed, then fails every write.
    pub fn fail_writes_after(&self, count: usize) {
        let done = self.inner.writes.load(Ordering::SeqCst);
        self.inner
            .writes_allowed
            .store(done.saturating_add(count), Ordering::SeqCst);
    }

    /// Lets `count` more syncs succeed, then fails every sync.
    pub fn fail_syncs_after(&self, count: usize) {
        let done = self.inner.syncs.load(Ordering::SeqCst);
        self.inner
            .syncs_allowed
            .store(done.saturating_add(count), Ordering::SeqCst);
    }

    /// Fails the next `count` writes, then lets writes succeed again.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.transient_writes.store(count, Ordering::SeqCst);
    }

    /// Disarms every fault.
    pub fn reset(&self) {
        self.inner.writes_allowed.store(usize::MAX, Ordering::SeqCst);
        self.inner.syncs_allowed.store(usize::MAX, Ordering::SeqCst);
        self.inner.transient_writes.store(0, Ordering::SeqCst);
        self.inner.tripped.store(false, Ordering::SeqCst);
    }

    /// Returns whether any fault has fired.
    #[must_use]
    pub fn tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// Writes that reached the inner backend.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Syncs that reached the inner backend.
    #[must_use]
    pub fn syncs(&self) -> usize {
        self.inner.syncs.load(Ordering::SeqCst)
    }

    fn admit_write(&self) -> StorageResult<()> {
        let transient = self.inner.transient_writes.load(Ordering::SeqCst);
        if transient > 0 {
            self.inner
                .transient_writes
                .store(transient - 1, Ordering::SeqCst);
            return Err(self.trip("injected transient write failure"));
        }
        if self.inner.writes.load(Ordering::SeqCst) >= self.inner.writes_allowed.load(Ordering::SeqCst)
        {
            return Err(self.trip("injected write failure"));
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn admit_sync(&self) -> StorageResult<()> {
        if self.inner.syncs.load(Ordering::SeqCst) >= self.inner.syncs_allowed.load(Ordering::SeqCst) {
            return Err(self.trip("injected sync failure"));
        }
        self.inner.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn trip(&self, message: &'static str) -> StorageError {
        self.inner.tripped.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
    }
}

/// A backend wrapper that fails writes or syncs when its [`FaultPlan`] says so.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    plan: FaultPlan,
}

impl FaultyBackend {
    /// Wraps `inner`, returning the backend and the handle that controls it.
    pub fn wrap(inner: Box<dyn StorageBackend>) -> (Self, FaultPlan) {
        let plan = FaultPlan::new();
        (
            Self {
                inner,
                plan: plan.clone(),
            },
            plan,
        )
    }
}

impl StorageBackend for FaultyBackend {
    fn allocate(&mut self, capacity: u64) -> StorageResult<()> {
        self.inner.allocate(capacity)
    }

    fn capacity(&self) -> u64 {
        self.inner.capacity()
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.plan.admit_write()?;
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.plan.admit_sync()?;
        self.inner.sync()
    }

    fn io_mode(&self) -> IoMode {
        self.inner.io_mode()
    }
}
