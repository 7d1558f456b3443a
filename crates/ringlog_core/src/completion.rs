//! Completion callbacks and the thread that runs them.
//!
//! Durability notifications never run on the thread that submitted the
//! entry or on the I/O thread: the pipeline queues them on a [`Dispatcher`],
//! which runs them one at a time, in the order they were queued.

use crate::error::JournalFailure;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked exactly once with the outcome of a submitted entry.
pub struct Completion(Box<dyn FnOnce(Result<(), JournalFailure>) + Send + 'static>);

impl Completion {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<(), JournalFailure>) + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// A completion that ignores the outcome.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// A completion that sends the outcome over a channel.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ringlog_core::Completion;
    ///
    /// let (completion, outcome) = Completion::channel();
    /// completion.complete(Ok(()));
    /// assert!(outcome.recv().unwrap().is_ok());
    /// ```
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<Result<(), JournalFailure>>) {
        let (tx, rx) = mpsc::channel();
        let completion = Self::new(move |result| {
            // The receiver may already be gone; nobody is waiting then.
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    /// Invokes the callback.
    pub fn complete(self, result: Result<(), JournalFailure>) {
        (self.0)(result);
    }
}

impl<F> From<F> for Completion
where
    F: FnOnce(Result<(), JournalFailure>) + Send + 'static,
{
    fn from(f: F) -> Self {
        Self::new(f)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    running: bool,
    stopping: bool,
}

struct DispatchQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    idle: Condvar,
}

struct DispatcherHandle {
    name: String,
    queue: Arc<DispatchQueue>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

/// A dedicated thread running queued completions in FIFO order.
///
/// Handles are cheap to clone. The thread stops when [`Dispatcher::stop`]
/// is called or the last handle is dropped, after running every job queued
/// before that point.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherHandle>,
}

impl Dispatcher {
    /// Starts a dispatcher thread with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(name: &str) -> std::io::Result<Self> {
        let queue = Arc::new(DispatchQueue {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker_queue = Arc::clone(&queue);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_jobs(&worker_queue))?;
        let thread_id = handle.thread().id();
        debug!(name, "dispatcher started");

        Ok(Self {
            inner: Arc::new(DispatcherHandle {
                name: name.to_string(),
                queue,
                thread: Mutex::new(Some(handle)),
                thread_id,
            }),
        })
    }

    /// Name of the dispatcher thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queues a job.
    ///
    /// After [`Dispatcher::stop`] the job runs on the calling thread instead,
    /// so a queued callback is never lost.
    pub fn queue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.queue.state.lock();
        if state.stopping {
            drop(state);
            warn!(name = %self.inner.name, "dispatcher stopped, running job inline");
            run_guarded(Box::new(job));
            return;
        }
        state.jobs.push_back(Box::new(job));
        self.inner.queue.ready.notify_one();
    }

    /// Queues a completion with its outcome.
    pub fn complete(&self, completion: Completion, result: Result<(), JournalFailure>) {
        self.queue(move || completion.complete(result));
    }

    /// Number of queued jobs not yet started.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.state.lock().jobs.len()
    }

    /// Blocks until every queued job has run.
    ///
    /// Returns immediately when called from a job, which would otherwise
    /// wait for itself.
    pub fn wait_for_empty(&self) {
        if thread::current().id() == self.inner.thread_id {
            return;
        }
        let mut state = self.inner.queue.state.lock();
        while !state.jobs.is_empty() || state.running {
            self.inner.queue.idle.wait(&mut state);
        }
    }

    /// Runs the remaining jobs and stops the thread. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl DispatcherHandle {
    fn stop(&self) {
        {
            let mut state = self.queue.state.lock();
            state.stopping = true;
            self.queue.ready.notify_all();
        }
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!(name = %self.name, "dispatcher thread panicked");
            }
            debug!(name = %self.name, "dispatcher stopped");
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_jobs(queue: &DispatchQueue) {
    let mut state = queue.state.lock();
    loop {
        if let Some(job) = state.jobs.pop_front() {
            state.running = true;
            drop(state);
            run_guarded(job);
            state = queue.state.lock();
            state.running = false;
            if state.jobs.is_empty() {
                queue.idle.notify_all();
            }
        } else if state.stopping {
            queue.idle.notify_all();
            return;
        } else {
            queue.ready.wait(&mut state);
        }
    }
}

fn run_guarded(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("completion callback panicked");
    }
}

struct GatherState {
    outstanding: usize,
    activated: bool,
    failure: Option<JournalFailure>,
    finisher: Option<Completion>,
}

struct Gather {
    state: Mutex<GatherState>,
    dispatcher: Dispatcher,
}

impl Gather {
    fn sub_finished(&self, result: Result<(), JournalFailure>) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        if let Err(failure) = result {
            state.failure.get_or_insert(failure);
        }
        self.fire_if_done(&mut state);
    }

    fn fire_if_done(&self, state: &mut GatherState) {
        if !state.activated || state.outstanding > 0 {
            return;
        }
        if let Some(finisher) = state.finisher.take() {
            let result = state.failure.take().map_or(Ok(()), Err);
            self.dispatcher.complete(finisher, result);
        }
    }
}

struct SubGuard {
    gather: Arc<Gather>,
    fired: bool,
}

impl SubGuard {
    fn finish(mut self, result: Result<(), JournalFailure>) {
        self.fired = true;
        self.gather.sub_finished(result);
    }
}

impl Drop for SubGuard {
    fn drop(&mut self) {
        if !self.fired {
            self.gather
                .sub_finished(Err(JournalFailure::new("sub-completion dropped unfired")));
        }
    }
}

/// Fans many completions into one.
///
/// Hand out sub-completions with [`GatherBuilder::new_sub`], then
/// [`GatherBuilder::activate`]. The final completion is queued on the
/// dispatcher once the gather is active and every sub-completion has fired.
/// It receives the first failure any sub-completion reported. A
/// sub-completion dropped without firing counts as a failure. Dropping the
/// builder activates it.
///
/// # Example
///
/// ```rust
/// use ringlog_core::{Completion, Dispatcher, GatherBuilder};
///
/// let dispatcher = Dispatcher::start("example-finisher").unwrap();
/// let (done, outcome) = Completion::channel();
///
/// let gather = GatherBuilder::new(&dispatcher, done);
/// let first = gather.new_sub();
/// let second = gather.new_sub();
/// gather.activate();
///
/// first.complete(Ok(()));
/// second.complete(Ok(()));
/// assert!(outcome.recv().unwrap().is_ok());
/// ```
pub struct GatherBuilder {
    gather: Arc<Gather>,
}

impl GatherBuilder {
    /// Creates an inactive gather that will finish with `finisher`.
    pub fn new(dispatcher: &Dispatcher, finisher: impl Into<Completion>) -> Self {
        Self {
            gather: Arc::new(Gather {
                state: Mutex::new(GatherState {
                    outstanding: 0,
                    activated: false,
                    failure: None,
                    finisher: Some(finisher.into()),
                }),
                dispatcher: dispatcher.clone(),
            }),
        }
    }

    /// Hands out one more sub-completion.
    #[must_use]
    pub fn new_sub(&self) -> Completion {
        self.gather.state.lock().outstanding += 1;
        let guard = SubGuard {
            gather: Arc::clone(&self.gather),
            fired: false,
        };
        Completion::new(move |result| guard.finish(result))
    }

    /// Sub-completions handed out and not yet fired.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.gather.state.lock().outstanding
    }

    /// Arms the gather. No more sub-completions can be created.
    pub fn activate(self) {
        // Drop does the work.
    }

    fn arm(&self) {
        let mut state = self.gather.state.lock();
        if !state.activated {
            state.activated = true;
            self.gather.fire_if_done(&mut state);
        }
    }
}

impl Drop for GatherBuilder {
    fn drop(&mut self) {
        self.arm();
    }
}

impl fmt::Debug for GatherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatherBuilder")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
