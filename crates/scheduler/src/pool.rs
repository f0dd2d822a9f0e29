//! Resizable worker pool for background closures.
//!
//! Workers are persistent threads pulling boxed closures from a shared
//! [`TaskQueue`]. An idle worker parks on a condition variable and is
//! woken by a new submission, by `kill()`/`wait()`, or by its own abort
//! flag when the pool shrinks.
//!
//! Pool state machine:
//!
//! ```text
//! Runnable ──wait()──▶ Interrupting ──queue empty, all idle──▶ Runnable
//! Runnable ──kill()──▶ Killing      ──all idle──────────────▶ Runnable
//! ```
//!
//! Submissions are rejected while the pool is `Interrupting` or `Killing`;
//! `resize()` is ignored in those states.

use crate::TaskQueue;
use log::{debug, error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: twice the number of logical CPU cores, since pool work is
    /// dominated by disk reads, downloads and image decoding.
    pub num_workers: usize,

    /// Prefix for worker thread names (`<prefix>-<id>`).
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: default_worker_count(),
            thread_name: "imgview-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with an explicit worker count.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Lifecycle state of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and running work.
    Runnable,
    /// `wait()` in progress: queued work drains, new work is rejected.
    Interrupting,
    /// `kill()` in progress: queued work was discarded, running work finishes.
    Killing,
}

/// Counters describing what the pool has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Closures accepted by `submit()`
    pub submitted: u64,

    /// Closures that ran to completion
    pub completed: u64,

    /// Submissions rejected because the pool was waiting or killing
    pub rejected: u64,

    /// Queued closures dropped by `kill()` before they started
    pub discarded: u64,

    /// Closures that panicked while running
    pub panicked: u64,
}

impl PoolStats {
    /// Closures accepted but neither finished nor discarded yet.
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.discarded + self.panicked)
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    discarded: AtomicU64,
    panicked: AtomicU64,
}

struct WorkerSlot {
    id: usize,
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

struct Control {
    state: PoolState,
    /// Worker threads that have not exited yet, aborted ones included.
    live: usize,
    /// Live workers currently parked without a closure.
    idle: usize,
    next_id: usize,
    /// Workers that count toward the target size.
    workers: Vec<WorkerSlot>,
}

struct Shared {
    queue: TaskQueue<Job>,
    control: Mutex<Control>,
    work_ready: Condvar,
    idle_changed: Condvar,
    counters: Counters,
    thread_name: String,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the next closure unless the pool is being killed.
    fn next_job(&self) -> Option<Job> {
        let control = self.lock();
        if control.state == PoolState::Killing {
            return None;
        }
        self.queue.pop()
    }

    fn run(&self, job: Job, worker_id: usize) {
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    "worker {worker_id}: task panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

/// Handle to the eventual result of a submitted closure.
///
/// The closure's return value is delivered through a one-shot channel.
/// When the closure never runs (rejected at submission, discarded by
/// `kill()`, or panicked) the channel is closed without a value.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Option<Receiver<T>>,
    rejected: bool,
}

/// Non-blocking view of a [`TaskHandle`].
#[derive(Debug, PartialEq, Eq)]
pub enum TaskPoll<T> {
    /// The closure finished and produced this value.
    Ready(T),
    /// The closure has not finished yet.
    Pending,
    /// The closure will never produce a value, or the value was already taken.
    Dropped,
}

impl<T> TaskHandle<T> {
    fn pending(rx: Receiver<T>) -> Self {
        Self {
            rx: Some(rx),
            rejected: false,
        }
    }

    fn rejected() -> Self {
        Self {
            rx: None,
            rejected: true,
        }
    }

    /// True if the pool refused the submission.
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Poll for the result without blocking.
    pub fn try_take(&mut self) -> TaskPoll<T> {
        let Some(rx) = &self.rx else {
            return TaskPoll::Dropped;
        };
        match rx.try_recv() {
            Ok(value) => {
                self.rx = None;
                TaskPoll::Ready(value)
            }
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                TaskPoll::Dropped
            }
        }
    }

    /// Block until the closure finishes.
    ///
    /// Returns `None` if the closure never ran or panicked.
    pub fn join(self) -> Option<T> {
        self.rx?.recv().ok()
    }
}

/// Worker pool executing caller-submitted closures.
///
/// # Example
///
/// ```
/// use imgview_scheduler::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(2));
/// let handle = pool.submit(|| 6 * 7);
///
/// assert_eq!(handle.join(), Some(42));
/// pool.wait();
/// assert!(!pool.active());
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create the pool and spawn its workers.
    pub fn new(config: WorkerPoolConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: TaskQueue::new(),
            control: Mutex::new(Control {
                state: PoolState::Runnable,
                live: 0,
                idle: 0,
                next_id: 0,
                workers: Vec::with_capacity(config.num_workers),
            }),
            work_ready: Condvar::new(),
            idle_changed: Condvar::new(),
            counters: Counters::default(),
            thread_name: config.thread_name,
        });

        {
            let mut control = shared.lock();
            for _ in 0..config.num_workers {
                spawn_worker(&shared, &mut control);
            }
        }

        Self { shared }
    }

    /// Queue a closure for execution.
    ///
    /// While the pool is waiting or killing, the closure is dropped and an
    /// already-rejected handle is returned.
    pub fn submit<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            // Receiver may already be gone; the caller stopped caring.
            let _ = tx.send(f());
        });

        let control = self.shared.lock();
        if control.state != PoolState::Runnable {
            let state = control.state;
            drop(control);
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("pool: rejected submission while {state:?}");
            return TaskHandle::rejected();
        }

        self.shared.queue.push(job);
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.work_ready.notify_one();
        drop(control);

        TaskHandle::pending(rx)
    }

    /// Grow or shrink the worker set without blocking.
    ///
    /// Surplus workers finish their current closure and exit on their own.
    /// Ignored while the pool is waiting or killing.
    pub fn resize(&self, num_workers: usize) {
        let mut control = self.shared.lock();
        if control.state != PoolState::Runnable {
            debug!("pool: resize to {num_workers} ignored while {:?}", control.state);
            return;
        }

        let current = control.workers.len();
        if num_workers > current {
            for _ in current..num_workers {
                spawn_worker(&self.shared, &mut control);
            }
        } else if num_workers < current {
            for mut slot in control.workers.drain(num_workers..) {
                slot.abort.store(true, Ordering::Release);
                // Detached: the worker exits after its current closure.
                slot.thread.take();
                debug!("pool: worker {} asked to exit", slot.id);
            }
            self.shared.work_ready.notify_all();
        }
        debug!("pool: resized from {current} to {}", control.workers.len());
    }

    /// Block until every queued closure has run and every worker is idle.
    ///
    /// New submissions are rejected while this is in progress. Intended for
    /// teardown, not for the interactive thread.
    pub fn wait(&self) {
        let mut control = self.shared.lock();
        if control.state == PoolState::Runnable {
            control.state = PoolState::Interrupting;
        }
        self.shared.work_ready.notify_all();

        loop {
            let drained = self.shared.queue.is_empty();
            if drained && control.idle == control.live {
                break;
            }
            if control.live == 0 {
                warn!(
                    "pool: wait() with no workers, {} closures left queued",
                    self.shared.queue.len()
                );
                break;
            }
            control = self
                .shared
                .idle_changed
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }

        control.state = PoolState::Runnable;
    }

    /// Drop all queued closures and block until running ones finish.
    ///
    /// The pool is runnable again when this returns.
    pub fn kill(&self) {
        let mut control = self.shared.lock();
        control.state = PoolState::Killing;
        let discarded = self.shared.queue.clear();
        self.shared
            .counters
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        self.shared.work_ready.notify_all();
        debug!("pool: kill discarded {discarded} queued closures");

        while control.idle != control.live {
            control = self
                .shared
                .idle_changed
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }

        control.state = PoolState::Runnable;
    }

    /// True if any worker is running a closure or work is still queued.
    pub fn active(&self) -> bool {
        let control = self.shared.lock();
        control.idle < control.live || !self.shared.queue.is_empty()
    }

    /// Target number of workers.
    pub fn num_workers(&self) -> usize {
        self.shared.lock().workers.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let workers = {
            let mut control = self.shared.lock();
            control.state = PoolState::Killing;
            let discarded = self.shared.queue.clear();
            self.shared
                .counters
                .discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
            for slot in &control.workers {
                slot.abort.store(true, Ordering::Release);
            }
            std::mem::take(&mut control.workers)
        };
        self.shared.work_ready.notify_all();

        for mut slot in workers {
            if let Some(thread) = slot.thread.take() {
                if thread.join().is_err() {
                    warn!("pool: worker {} exited abnormally", slot.id);
                }
            }
        }
    }
}

fn spawn_worker(shared: &Arc<Shared>, control: &mut Control) {
    let id = control.next_id;
    control.next_id += 1;
    let abort = Arc::new(AtomicBool::new(false));

    // Counted as live and busy until it parks for the first time.
    control.live += 1;

    let worker_shared = shared.clone();
    let worker_abort = abort.clone();
    let spawned = thread::Builder::new()
        .name(format!("{}-{id}", shared.thread_name))
        .spawn(move || worker_loop(worker_shared, worker_abort, id));

    match spawned {
        Ok(thread) => control.workers.push(WorkerSlot {
            id,
            abort,
            thread: Some(thread),
        }),
        Err(e) => {
            control.live -= 1;
            error!("pool: failed to spawn worker {id}: {e}");
        }
    }
}

fn worker_loop(shared: Arc<Shared>, abort: Arc<AtomicBool>, id: usize) {
    debug!("worker {id}: started");

    'run: loop {
        if abort.load(Ordering::Acquire) {
            break;
        }

        if let Some(job) = shared.next_job() {
            shared.run(job, id);
            continue;
        }

        let mut control = shared.lock();
        control.idle += 1;
        shared.idle_changed.notify_all();

        loop {
            if abort.load(Ordering::Acquire) {
                control.idle -= 1;
                break 'run;
            }
            if control.state != PoolState::Killing && !shared.queue.is_empty() {
                control.idle -= 1;
                break;
            }
            control = shared
                .work_ready
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    let mut control = shared.lock();
    control.live -= 1;
    shared.idle_changed.notify_all();
    debug!("worker {id}: exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Default worker count: twice the number of logical CPU cores.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        * 2
}
