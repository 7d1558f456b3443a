//! Write pipeline: batch assembly and the I/O threads.
//!
//! Submitters append [`PendingWrite`]s to the queue under the ordering
//! lock. The writer thread drains the queue under that lock, then releases
//! it and assembles an [`IoBatch`], coalescing frames that sit next to each
//! other on disk. It either executes each batch itself or hands it to the
//! async I/O thread. A batch is written,
//! synced, and only then are its completions queued on the dispatcher.
//!
//! A header rewrite always leads the batch it belongs to and is synced
//! before any of that batch's data is written, so space released by a trim
//! is never overwritten while the durable header still points into it.

use crate::completion::{Completion, Dispatcher};
use crate::config::JournalConfig;
use crate::error::JournalFailure;
use crate::header::JournalHeader;
use crate::ring::{Reservation, RingAllocator};
use crate::scanner::ReplayStop;
use crate::stats::JournalStats;
use crate::trim::TrimIndex;
use crate::types::{JournalId, Phase, SequenceNumber};
use parking_lot::{Condvar, Mutex};
use ringlog_storage::{AlignedBuf, StorageBackend, StorageError, StorageResult};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace, warn};

/// State shared between the journal handle and its threads.
pub(crate) struct Shared {
    pub id: JournalId,
    pub config: JournalConfig,
    pub io_alignment: usize,
    pub dispatcher: Dispatcher,
    pub backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    pub state: Mutex<PipelineState>,
    /// Signalled when the queue gains work or the phase changes.
    pub work_ready: Condvar,
    /// Signalled when a trim frees space or the journal stops accepting writes.
    pub space_freed: Condvar,
    pub stats: JournalStats,
}

/// Everything guarded by the ordering lock.
pub(crate) struct PipelineState {
    pub phase: Phase,
    pub failure: Option<JournalFailure>,
    pub header: Option<JournalHeader>,
    pub header_dirty: bool,
    pub ring: RingAllocator,
    pub trim: TrimIndex,
    pub queue: VecDeque<PendingWrite>,
    pub in_flight: usize,
    pub last_submitted: SequenceNumber,
    pub last_durable: SequenceNumber,
    pub replay_stop: Option<ReplayStop>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Unopened,
            failure: None,
            header: None,
            header_dirty: false,
            ring: RingAllocator::new(0, 0),
            trim: TrimIndex::default(),
            queue: VecDeque::new(),
            in_flight: 0,
            last_submitted: SequenceNumber::ZERO,
            last_durable: SequenceNumber::ZERO,
            replay_stop: None,
        }
    }
}

/// An entry waiting to be written.
pub(crate) struct PendingWrite {
    pub sequence: SequenceNumber,
    pub reservation: Reservation,
    pub frame: Vec<u8>,
    /// Wrap marker to write at the given offset before this entry.
    pub marker: Option<(u64, Vec<u8>)>,
    pub completion: Completion,
}

impl PendingWrite {
    fn disk_bytes(&self) -> usize {
        self.frame.len() + self.marker.as_ref().map_or(0, |(_, m)| m.len())
    }
}

/// Contiguous bytes written with one `write_at`.
pub(crate) struct Segment {
    pub offset: u64,
    pub buf: AlignedBuf,
}

/// One unit of I/O: optional header rewrite, data segments, completions.
pub(crate) struct IoBatch {
    pub header: Option<AlignedBuf>,
    pub segments: Vec<Segment>,
    pub completions: Vec<Completion>,
    pub last_sequence: Option<SequenceNumber>,
    pub bytes: u64,
}

impl IoBatch {
    fn entries(&self) -> usize {
        self.completions.len()
    }
}

/// Writes taken off the queue, not yet copied into I/O buffers.
pub(crate) struct Drained {
    pub header: Option<JournalHeader>,
    pub pieces: Vec<(u64, Vec<u8>)>,
    pub completions: Vec<Completion>,
    pub last_sequence: Option<SequenceNumber>,
    pub bytes: usize,
}

impl Drained {
    /// Encodes the header and coalesces the frames. Runs without the
    /// ordering lock.
    pub fn into_batch(self, io_alignment: usize) -> IoBatch {
        let header = self.header.map(|h| h.encode_block(io_alignment));
        let header_bytes = header.as_ref().map_or(0, AlignedBuf::len);
        IoBatch {
            header,
            segments: coalesce(self.pieces, io_alignment),
            completions: self.completions,
            last_sequence: self.last_sequence,
            bytes: (self.bytes + header_bytes) as u64,
        }
    }
}

/// Drains the queue, honoring the configured limits. The first entry is
/// always taken, however large. Frames are moved, not copied.
pub(crate) fn take_batch(state: &mut PipelineState, config: &JournalConfig) -> Drained {
    let header = if state.header_dirty {
        state.header_dirty = false;
        state.header
    } else {
        None
    };

    let mut pieces: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut completions = Vec::new();
    let mut last_sequence = None;
    let mut bytes = 0usize;

    while let Some(next) = state.queue.front() {
        let size = next.disk_bytes();
        if !completions.is_empty()
            && (completions.len() >= config.max_batch_entries
                || bytes + size > config.max_batch_bytes)
        {
            break;
        }
        let Some(write) = state.queue.pop_front() else {
            break;
        };
        bytes += size;
        if let Some(marker) = write.marker {
            pieces.push(marker);
        }
        pieces.push((write.reservation.offset, write.frame));
        completions.push(write.completion);
        last_sequence = Some(write.sequence);
    }
    state.in_flight += completions.len();

    Drained {
        header,
        pieces,
        completions,
        last_sequence,
        bytes,
    }
}

/// Merges pieces that are adjacent on disk into aligned segments.
fn coalesce(pieces: Vec<(u64, Vec<u8>)>, io_alignment: usize) -> Vec<Segment> {
    let mut runs: Vec<(u64, Vec<Vec<u8>>, usize)> = Vec::new();
    for (offset, bytes) in pieces {
        match runs.last_mut() {
            Some((start, parts, len)) if *start + *len as u64 == offset => {
                *len += bytes.len();
                parts.push(bytes);
            }
            _ => {
                let len = bytes.len();
                runs.push((offset, vec![bytes], len));
            }
        }
    }

    runs.into_iter()
        .map(|(offset, parts, len)| {
            let mut buf = AlignedBuf::zeroed(len, io_alignment);
            let mut at = 0;
            for part in parts {
                buf.as_mut_slice()[at..at + part.len()].copy_from_slice(&part);
                at += part.len();
            }
            Segment { offset, buf }
        })
        .collect()
}

impl Shared {
    pub fn failure(&self) -> Option<JournalFailure> {
        self.state.lock().failure.clone()
    }

    /// Writes and syncs one batch.
    fn execute(&self, batch: &IoBatch) -> Result<(), JournalFailure> {
        let mut backend = self.backend.lock();
        if let Some(header) = &batch.header {
            self.retry("header write", || backend.write_at(0, header.as_slice()))?;
            self.retry("header sync", || backend.sync())?;
            self.stats.record_header_write();
            self.stats.record_sync();
        }
        for segment in &batch.segments {
            self.retry("write", || {
                backend.write_at(segment.offset, segment.buf.as_slice())
            })?;
        }
        if !batch.segments.is_empty() {
            self.retry("sync", || backend.sync())?;
            self.stats.record_sync();
        }
        Ok(())
    }

    fn retry(
        &self,
        what: &'static str,
        mut op: impl FnMut() -> StorageResult<()>,
    ) -> Result<(), JournalFailure> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(err @ StorageError::Io(_)) if attempt < self.config.io_retries => {
                    attempt += 1;
                    self.stats.record_retry();
                    warn!(what, attempt, error = %err, "journal I/O failed, retrying");
                    thread::sleep(self.config.retry_backoff);
                }
                Err(err) => {
                    error!(what, attempts = attempt + 1, error = %err, "journal I/O failed");
                    return Err(JournalFailure::new(format!("{what} failed: {err}")));
                }
            }
        }
    }

    /// Executes a batch and reports its outcome.
    fn run_batch(&self, batch: IoBatch) {
        if let Some(failure) = self.failure() {
            self.fail_batch(batch, failure);
            return;
        }
        match self.execute(&batch) {
            Ok(()) => self.finish_batch(batch),
            Err(failure) => {
                self.fail_batch(batch, failure.clone());
                self.fail(failure);
            }
        }
    }

    fn finish_batch(&self, batch: IoBatch) {
        let entries = batch.entries();
        trace!(entries, bytes = batch.bytes, "batch durable");
        self.stats.record_batch(batch.bytes);
        self.stats.record_durable(entries as u64);
        {
            let mut state = self.state.lock();
            state.in_flight -= entries;
            if let Some(last) = batch.last_sequence {
                state.last_durable = state.last_durable.max(last);
            }
        }
        let completions = batch.completions;
        if !completions.is_empty() {
            self.dispatcher.queue(move || {
                for completion in completions {
                    completion.complete(Ok(()));
                }
            });
        }
    }

    fn fail_batch(&self, batch: IoBatch, failure: JournalFailure) {
        let entries = batch.entries();
        self.state.lock().in_flight -= entries;
        self.fail_completions(batch.completions, failure);
    }

    fn fail_completions(&self, completions: Vec<Completion>, failure: JournalFailure) {
        if completions.is_empty() {
            return;
        }
        self.stats.record_failed(completions.len() as u64);
        self.dispatcher.queue(move || {
            for completion in completions {
                completion.complete(Err(failure.clone()));
            }
        });
    }

    /// Breaks the journal: every queued write fails and everyone blocked on
    /// the ordering lock wakes up.
    pub fn fail(&self, failure: JournalFailure) {
        let queued: Vec<Completion> = {
            let mut state = self.state.lock();
            if state.failure.is_none() {
                error!(id = %self.id, reason = %failure, "journal broken");
                state.failure = Some(failure.clone());
            }
            if state.phase != Phase::Closed {
                state.phase = Phase::Broken;
            }
            state.queue.drain(..).map(|w| w.completion).collect()
        };
        self.work_ready.notify_all();
        self.space_freed.notify_all();
        self.fail_completions(queued, failure);
    }
}

/// Writer thread body. With `sink` set, batches go to the async I/O thread.
pub(crate) fn run_writer(shared: &Shared, sink: Option<SyncSender<IoBatch>>) {
    debug!(id = %shared.id, async_io = sink.is_some(), "journal writer started");
    loop {
        let batch = {
            let mut state = shared.state.lock();
            loop {
                if state.phase == Phase::Broken {
                    debug!("journal writer stopping on failure");
                    return;
                }
                if !state.queue.is_empty() || state.header_dirty {
                    break;
                }
                if state.phase != Phase::Writeable {
                    debug!("journal writer drained");
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
            take_batch(&mut state, &shared.config)
        };
        let batch = batch.into_batch(shared.io_alignment);

        match &sink {
            Some(sender) => {
                if let Err(err) = sender.send(batch) {
                    let failure = JournalFailure::new("async I/O thread exited");
                    shared.fail_batch(err.0, failure.clone());
                    shared.fail(failure);
                    return;
                }
            }
            None => shared.run_batch(batch),
        }
    }
}

/// Async I/O thread body. Runs until the writer drops its sender.
pub(crate) fn run_aio(shared: &Shared, batches: Receiver<IoBatch>) {
    debug!(id = %shared.id, "journal aio thread started");
    for batch in batches {
        shared.run_batch(batch);
    }
    debug!("journal aio thread stopped");
}
