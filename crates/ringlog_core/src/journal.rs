//! The journal handle.

use crate::completion::{Completion, Dispatcher};
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalFailure, JournalResult, OpenError};
use crate::frame::{self, FrameKey, HEADER_SIZE};
use crate::header::JournalHeader;
use crate::pipeline::{self, PendingWrite, PipelineState, Shared};
use crate::ring::RingAllocator;
use crate::scanner::{ReplayStop, Scanner};
use crate::stats::{JournalStats, StatsSnapshot};
use crate::trim::{LiveRecord, TrimIndex};
use crate::types::{Entry, JournalId, Phase, SequenceNumber};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use ringlog_storage::{AlignedBuf, StorageBackend};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Workers {
    writer: Option<JoinHandle<()>>,
    aio: Option<JoinHandle<()>>,
}

/// A circular write-ahead journal over a fixed-capacity backing store.
///
/// # Lifecycle
///
/// ```text
/// new ─┬─ create ──────────────────┬─ make_writeable ─ submit_entry* ─ close
///      └─ open ─ read_entry* ──────┘
/// ```
///
/// A closed journal can be opened again. Dropping a journal closes it.
///
/// # Durability
///
/// `submit_entry` returns once the entry is queued. Its completion runs on
/// the dispatcher thread after the entry is durable, or with a
/// [`JournalFailure`] if the journal broke first. Completions of successive
/// entries run in submission order.
///
/// # Example
///
/// ```rust
/// use ringlog_core::{Completion, Dispatcher, Journal, JournalConfig, JournalId, SequenceNumber};
/// use ringlog_storage::InMemoryBackend;
///
/// let dispatcher = Dispatcher::start("journal-finisher").unwrap();
/// let config = JournalConfig::new().capacity(1 << 20);
/// let journal = Journal::new(
///     JournalId::new(),
///     Box::new(InMemoryBackend::new()),
///     config,
///     dispatcher,
/// )
/// .unwrap();
///
/// journal.create().unwrap();
/// journal.make_writeable().unwrap();
///
/// let (done, durable) = Completion::channel();
/// journal
///     .submit_entry(SequenceNumber::new(1), &b"hello"[..], 0, done)
///     .unwrap();
/// durable.recv().unwrap().unwrap();
///
/// journal.committed_thru(SequenceNumber::new(1)).unwrap();
/// journal.close().unwrap();
/// ```
pub struct Journal {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
    replay: Mutex<Option<Scanner>>,
}

impl Journal {
    /// Creates a journal handle over `backend`. Nothing is read or written
    /// until [`Journal::create`] or [`Journal::open`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] if the configuration is
    /// inconsistent or does not match the backend's I/O mode.
    pub fn new(
        id: JournalId,
        backend: Box<dyn StorageBackend>,
        config: JournalConfig,
        dispatcher: Dispatcher,
    ) -> JournalResult<Self> {
        config.validate()?;

        let mode = backend.io_mode();
        if mode.is_direct() != config.direct_io {
            return Err(JournalError::invalid_config(format!(
                "backend I/O mode {mode:?} does not match direct_io = {}",
                config.direct_io
            )));
        }
        let io_alignment = backend.alignment().max(1);
        if config.block_size as usize % io_alignment != 0 {
            return Err(JournalError::invalid_config(format!(
                "block size {} is not a multiple of the device alignment {io_alignment}",
                config.block_size
            )));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                config,
                io_alignment,
                dispatcher,
                backend: Arc::new(Mutex::new(backend)),
                state: Mutex::new(PipelineState::new()),
                work_ready: Condvar::new(),
                space_freed: Condvar::new(),
                stats: JournalStats::new(),
            }),
            workers: Mutex::new(Workers::default()),
            replay: Mutex::new(None),
        })
    }

    /// Initializes an empty journal, overwriting whatever the backing store
    /// held.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is open or the store cannot be
    /// allocated or written.
    pub fn create(&self) -> JournalResult<()> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        expect_idle(&state, "create")?;

        let header = JournalHeader::new(self.shared.id, config);
        {
            let mut backend = self.shared.backend.lock();
            backend.allocate(config.capacity)?;
            let blank = AlignedBuf::zeroed(config.block_size as usize, self.shared.io_alignment);
            backend.write_at(config.header_end(), blank.as_slice())?;
            backend.write_at(0, header.encode_block(self.shared.io_alignment).as_slice())?;
            backend.sync()?;
        }

        reset_state(&mut state);
        state.ring = RingAllocator::new(header.header_end(), header.capacity);
        state.header = Some(header);
        state.phase = Phase::Created;
        info!(
            id = %self.shared.id,
            capacity = config.capacity,
            block_size = config.block_size,
            direct_io = config.direct_io,
            "journal created"
        );
        Ok(())
    }

    /// Opens an existing journal for replay.
    ///
    /// Entries with a sequence at or below `starting_sequence` are validated
    /// but not returned by [`Journal::read_entry`]; the owner has applied
    /// them already.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Open`] if the header is missing, damaged or
    /// belongs to a different journal, and a storage error if it cannot be
    /// read.
    pub fn open(&self, starting_sequence: SequenceNumber) -> JournalResult<()> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        expect_idle(&state, "open")?;

        let header = {
            let backend = self.shared.backend.lock();
            let capacity = backend.capacity();
            if capacity < config.header_end() {
                return Err(OpenError::BadMagic.into());
            }
            let block = backend.read_at(0, config.block_size as usize)?;
            let header = JournalHeader::decode(&block)?;
            header.check_compatible(self.shared.id, config, capacity)?;
            header
        };

        *self.replay.lock() = Some(Scanner::new(
            Arc::clone(&self.shared.backend),
            &header,
            self.shared.io_alignment,
            starting_sequence,
        ));

        reset_state(&mut state);
        state.last_submitted = header.committed_seq;
        state.header = Some(header);
        state.phase = Phase::Replaying;
        info!(
            id = %self.shared.id,
            start_offset = header.start_offset,
            committed = %header.committed_seq,
            epoch = header.epoch,
            skip_through = %starting_sequence,
            "journal opened"
        );
        Ok(())
    }

    /// Returns the next replayed entry, or `None` once replay has stopped.
    ///
    /// Replay stops at the first torn, corrupt or stale record; nothing
    /// after it is ever returned. [`Journal::replay_stop`] tells why.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidOperation`] outside of replay and a
    /// storage error if the backing store fails.
    pub fn read_entry(&self) -> JournalResult<Option<Entry>> {
        let phase = self.phase();
        if phase != Phase::Replaying {
            return Err(JournalError::invalid_operation(format!(
                "read_entry needs a replaying journal (phase: {phase})"
            )));
        }

        let mut replay = self.replay.lock();
        let Some(scanner) = replay.as_mut() else {
            return Ok(None);
        };
        let entry = scanner.next_entry()?;
        if entry.is_some() {
            self.shared.stats.record_replayed();
        }
        Ok(entry)
    }

    /// Starts accepting submissions.
    ///
    /// After a replay, the rest of the log is scanned to find where writing
    /// resumes; entries not yet read are kept but will not be returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is neither created nor replaying,
    /// or if the header cannot be rewritten.
    pub fn make_writeable(&self) -> JournalResult<()> {
        let mut state = self.shared.state.lock();
        match state.phase {
            Phase::Created => {}
            Phase::Writeable => return Ok(()),
            Phase::Replaying => self.resume_after_replay(&mut state)?,
            phase => {
                return Err(JournalError::invalid_operation(format!(
                    "make_writeable needs a created or replaying journal (phase: {phase})"
                )));
            }
        }
        state.phase = Phase::Writeable;
        drop(state);

        if let Err(err) = self.spawn_workers() {
            self.shared
                .fail(JournalFailure::new(format!("cannot start journal threads: {err}")));
            return Err(err);
        }
        debug!(id = %self.shared.id, "journal writeable");
        Ok(())
    }

    fn resume_after_replay(&self, state: &mut PipelineState) -> JournalResult<()> {
        let scanner = self
            .replay
            .lock()
            .take()
            .ok_or_else(|| JournalError::invalid_operation("replay already consumed"))?;
        let outcome = scanner.finish()?;

        let Some(mut header) = state.header else {
            return Err(JournalError::invalid_operation("journal has no header"));
        };
        header.epoch = header
            .epoch
            .checked_add(1)
            .ok_or_else(|| JournalError::invalid_operation("write epoch exhausted"))?;
        {
            let mut backend = self.shared.backend.lock();
            backend.write_at(0, header.encode_block(self.shared.io_alignment).as_slice())?;
            backend.sync()?;
        }

        info!(
            id = %self.shared.id,
            live = outcome.live.len(),
            last = %outcome.last_sequence,
            stop = %outcome.stop,
            epoch = header.epoch,
            "resuming after replay"
        );
        state.ring = RingAllocator::resume(
            header.header_end(),
            header.capacity,
            outcome.start,
            outcome.end,
            outcome.gap,
        );
        state.trim = TrimIndex::from_records(header.committed_seq, outcome.live);
        state.last_submitted = outcome.last_sequence.max(header.committed_seq);
        state.last_durable = state.last_submitted;
        state.replay_stop = Some(outcome.stop);
        state.header = Some(header);
        Ok(())
    }

    fn spawn_workers(&self) -> JournalResult<()> {
        let mut workers = self.workers.lock();

        let sink = if self.shared.config.async_io {
            let (sender, receiver) = mpsc::sync_channel(self.shared.config.aio_depth);
            let shared = Arc::clone(&self.shared);
            workers.aio = Some(
                thread::Builder::new()
                    .name("ringlog-aio".into())
                    .spawn(move || pipeline::run_aio(&shared, receiver))?,
            );
            Some(sender)
        } else {
            None
        };

        let shared = Arc::clone(&self.shared);
        workers.writer = Some(
            thread::Builder::new()
                .name("ringlog-writer".into())
                .spawn(move || pipeline::run_writer(&shared, sink))?,
        );
        Ok(())
    }

    /// Queues an entry for durable writing.
    ///
    /// Blocks while the ring is full, until [`Journal::committed_thru`]
    /// releases enough space. `completion` runs exactly once, after the
    /// entry is durable or the journal has broken. If this returns an
    /// error, the entry was not queued and `completion` is dropped without
    /// being called.
    ///
    /// # Errors
    ///
    /// - [`JournalError::NotWriteable`] unless the journal is writeable
    /// - [`JournalError::Broken`] after an I/O failure
    /// - [`JournalError::SequenceOutOfOrder`] unless `sequence` exceeds every
    ///   sequence submitted or replayed before
    /// - [`JournalError::EntryTooLarge`] if the entry can never fit the ring
    pub fn submit_entry(
        &self,
        sequence: SequenceNumber,
        payload: impl Into<Bytes>,
        flags: u32,
        completion: impl Into<Completion>,
    ) -> JournalResult<()> {
        let payload = payload.into();
        let (key, epoch, alignment) = {
            let state = self.shared.state.lock();
            check_submit(&state, sequence)?;
            frame_params(&state)?
        };

        let usable = self.shared.config.capacity - self.shared.config.header_end();
        let too_large = || JournalError::EntryTooLarge {
            frame_len: frame::frame_len(payload.len(), alignment) as u64,
            usable,
        };
        let encoded = frame::encode(&key, epoch, sequence, &payload, flags, alignment)
            .map_err(|_| too_large())?;
        let len = encoded.len() as u64;
        if len > usable {
            return Err(too_large());
        }

        let mut state = self.shared.state.lock();
        let reservation = loop {
            check_submit(&state, sequence)?;
            if frame_params(&state)? != (key, epoch, alignment) {
                return Err(JournalError::invalid_operation(
                    "journal was reopened during submission",
                ));
            }
            match state.ring.reserve(len) {
                Ok(reservation) => break reservation,
                Err(_) if state.ring.is_empty() => {
                    // Nothing is live, so the ring can restart at its
                    // beginning. The header moves with it.
                    let start = state.ring.region_start();
                    state.ring.reset(start);
                    if let Some(header) = state.header.as_mut() {
                        header.start_offset = start;
                    }
                    state.header_dirty = true;
                }
                Err(full) => {
                    self.shared.stats.record_full_wait();
                    debug!(%sequence, needed = full.needed, free = full.free, "ring full, waiting for trim");
                    self.shared.space_freed.wait(&mut state);
                }
            }
        };

        let marker = reservation
            .wrap
            .filter(|gap| gap.len >= HEADER_SIZE as u64)
            .map(|gap| {
                (
                    gap.start,
                    frame::encode_wrap_marker(&key, epoch, sequence, alignment),
                )
            });
        state.trim.track(LiveRecord {
            sequence,
            offset: reservation.offset,
            len,
        });
        state.last_submitted = sequence;
        state.queue.push_back(PendingWrite {
            sequence,
            reservation,
            frame: encoded,
            marker,
            completion: completion.into(),
        });
        drop(state);

        self.shared.stats.record_submit(len);
        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Declares every entry up to and including `sequence` applied, so its
    /// space can be reused.
    ///
    /// A `sequence` at or below the current watermark is ignored. The
    /// watermark never passes the last submitted sequence; a higher value
    /// is clamped to it, and entries submitted later are released by a
    /// later call.
    ///
    /// # Errors
    ///
    /// Returns an error unless the journal is writeable.
    pub fn committed_thru(&self, sequence: SequenceNumber) -> JournalResult<()> {
        let mut state = self.shared.state.lock();
        match state.phase {
            Phase::Writeable => {}
            Phase::Broken => return Err(JournalError::Broken(broken_reason(&state))),
            phase => return Err(JournalError::NotWriteable { phase }),
        }

        let sequence = sequence.min(state.last_submitted);
        let Some(reclaim) = state.trim.advance(sequence) else {
            debug!(%sequence, committed = %state.trim.committed(), "watermark released nothing");
            return Ok(());
        };
        match reclaim.next {
            Some(offset) => state.ring.release_to(offset),
            None => state.ring.release_all(),
        }
        let start = state.ring.start();
        if let Some(header) = state.header.as_mut() {
            header.start_offset = start;
            header.committed_seq = reclaim.through;
        }
        state.header_dirty = true;
        drop(state);

        debug!(
            %sequence,
            records = reclaim.records,
            bytes = reclaim.bytes,
            start,
            "trimmed journal"
        );
        self.shared
            .stats
            .record_reclaim(reclaim.records as u64, reclaim.bytes);
        self.shared.work_ready.notify_one();
        self.shared.space_freed.notify_all();
        Ok(())
    }

    /// Drains outstanding writes, stops the journal threads and waits until
    /// every completion queued so far has run. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Broken`] if the journal broke before or
    /// while closing, and a storage error if the final sync fails. The
    /// journal is closed either way.
    pub fn close(&self) -> JournalResult<()> {
        let phase = {
            let mut state = self.shared.state.lock();
            match state.phase {
                Phase::Unopened | Phase::Closed => return Ok(()),
                Phase::Created | Phase::Replaying => {
                    state.phase = Phase::Closed;
                    self.replay.lock().take();
                    debug!(id = %self.shared.id, "journal closed");
                    return Ok(());
                }
                Phase::Writeable => {
                    state.phase = Phase::Closing;
                    Phase::Closing
                }
                phase @ (Phase::Closing | Phase::Broken) => phase,
            }
        };
        self.shared.work_ready.notify_all();
        self.shared.space_freed.notify_all();

        {
            let mut workers = self.workers.lock();
            for handle in [workers.writer.take(), workers.aio.take()].into_iter().flatten() {
                if handle.join().is_err() {
                    self.shared
                        .fail(JournalFailure::new("journal thread panicked"));
                }
            }
        }

        let synced = if phase == Phase::Broken {
            Ok(())
        } else {
            self.shared.backend.lock().sync()
        };
        self.shared.dispatcher.wait_for_empty();

        let failure = {
            let mut state = self.shared.state.lock();
            state.phase = Phase::Closed;
            state.failure.clone()
        };
        info!(id = %self.shared.id, broken = failure.is_some(), "journal closed");

        synced?;
        match failure {
            Some(failure) => Err(JournalError::Broken(failure)),
            None => Ok(()),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// The journal's identity.
    #[must_use]
    pub fn id(&self) -> JournalId {
        self.shared.id
    }

    /// The configuration the journal was built with.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.shared.config
    }

    /// The in-memory header, once created or opened. It may be ahead of
    /// the persisted one by a pending trim.
    #[must_use]
    pub fn header(&self) -> Option<JournalHeader> {
        self.shared.state.lock().header
    }

    /// Bytes currently free in the ring.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.shared.state.lock().ring.free_bytes()
    }

    /// Highest watermark passed to [`Journal::committed_thru`] (or persisted
    /// by a previous run).
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        let state = self.shared.state.lock();
        match state.phase {
            Phase::Writeable | Phase::Closing | Phase::Broken | Phase::Closed => {
                state.trim.committed()
            }
            _ => state
                .header
                .map_or(SequenceNumber::ZERO, |h| h.committed_seq),
        }
    }

    /// Highest sequence submitted or replayed.
    #[must_use]
    pub fn last_submitted(&self) -> SequenceNumber {
        self.shared.state.lock().last_submitted
    }

    /// Highest sequence known to be durable.
    #[must_use]
    pub fn last_durable(&self) -> SequenceNumber {
        self.shared.state.lock().last_durable
    }

    /// Entries queued or being written.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        let state = self.shared.state.lock();
        state.queue.len() + state.in_flight
    }

    /// Live records in the ring, pending ones included.
    #[must_use]
    pub fn live_records(&self) -> usize {
        self.shared.state.lock().trim.len()
    }

    /// Why the last replay stopped, once it has.
    #[must_use]
    pub fn replay_stop(&self) -> Option<ReplayStop> {
        let scanning = self
            .replay
            .lock()
            .as_ref()
            .and_then(|scanner| scanner.stop_reason().cloned());
        scanning.or_else(|| self.shared.state.lock().replay_stop.clone())
    }

    /// The failure that broke the journal, if any.
    #[must_use]
    pub fn failure(&self) -> Option<JournalFailure> {
        self.shared.failure()
    }

    /// Snapshot of the journal counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(id = %self.shared.id, error = %err, "error closing journal on drop");
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("id", &self.shared.id)
            .field("phase", &self.phase())
            .finish()
    }
}

fn expect_idle(state: &PipelineState, operation: &str) -> JournalResult<()> {
    match state.phase {
        Phase::Unopened | Phase::Closed => Ok(()),
        phase => Err(JournalError::invalid_operation(format!(
            "{operation} needs an unopened or closed journal (phase: {phase})"
        ))),
    }
}

fn reset_state(state: &mut PipelineState) {
    *state = PipelineState::new();
}

fn check_submit(state: &PipelineState, sequence: SequenceNumber) -> JournalResult<()> {
    match state.phase {
        Phase::Writeable => {}
        Phase::Broken => return Err(JournalError::Broken(broken_reason(state))),
        phase => return Err(JournalError::NotWriteable { phase }),
    }
    if sequence <= state.last_submitted {
        return Err(JournalError::SequenceOutOfOrder {
            sequence,
            last: state.last_submitted,
        });
    }
    Ok(())
}

fn frame_params(state: &PipelineState) -> JournalResult<(FrameKey, u32, usize)> {
    let header = state
        .header
        .as_ref()
        .ok_or_else(|| JournalError::invalid_operation("journal has no header"))?;
    Ok((header.key(), header.epoch, header.frame_alignment as usize))
}

fn broken_reason(state: &PipelineState) -> JournalFailure {
    state
        .failure
        .clone()
        .unwrap_or_else(|| JournalFailure::new("journal is broken"))
}
