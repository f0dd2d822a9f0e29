//! A single logical download.
//!
//! A [`Transfer`] is a cheaply cloneable handle; every clone sees the same
//! buffer, counters and flags. Producer threads create and submit it, the
//! engine's reactor appends to it, and any thread may cancel, pause, poll
//! progress or block on its outcome.

use crate::TransferError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Process-unique transfer identifier.
pub type TransferId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Idle,
    Active,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TransferStatus {
    /// True once the transfer can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Bytes received so far and, once the server reported it, the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub received: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Completion ratio in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.received as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Terminal result of a transfer.
///
/// Cancellation is its own outcome: it is neither a success carrying
/// partial data nor a network failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(Arc<[u8]>),
    Cancelled,
    Failed(TransferError),
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Body bytes of a completed transfer.
    pub fn bytes(&self) -> Option<&Arc<[u8]>> {
        match self {
            Self::Completed(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// How the engine ended a transfer. Converted into a [`TransferOutcome`]
/// by [`Transfer::finish`].
#[derive(Debug)]
pub(crate) enum Finish {
    Completed,
    Cancelled,
    Failed(TransferError),
}

type CompletionCallback = Box<dyn FnOnce(&Transfer) + Send>;

struct State {
    url: String,
    status: TransferStatus,
    buffer: Vec<u8>,
    received: u64,
    total: Option<u64>,
    attempts: u32,
    outcome: Option<TransferOutcome>,
    on_complete: Option<CompletionCallback>,
}

impl State {
    fn new(url: String) -> Self {
        Self {
            url,
            status: TransferStatus::Idle,
            buffer: Vec::new(),
            received: 0,
            total: None,
            attempts: 0,
            outcome: None,
            on_complete: None,
        }
    }
}

struct Inner {
    id: TransferId,
    state: Mutex<State>,
    finished: Condvar,
    cancelled: AtomicBool,
    paused: AtomicBool,
    /// Wakes the reactor task driving this transfer (cancel / resume).
    wake: Notify,
}

/// One HTTP GET with cooperative cancellation and progress visibility.
///
/// # Example
///
/// ```
/// use imgview_transfer::{Transfer, TransferStatus};
///
/// let transfer = Transfer::new("https://example.com/a.png");
/// assert_eq!(transfer.status(), TransferStatus::Idle);
///
/// transfer.cancel();
/// assert_eq!(transfer.status(), TransferStatus::Cancelled);
/// assert!(transfer.outcome().unwrap().is_cancelled());
/// ```
#[derive(Clone)]
pub struct Transfer {
    inner: Arc<Inner>,
}

impl Transfer {
    /// Create an idle transfer for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(State::new(url.into())),
                finished: Condvar::new(),
                cancelled: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-arm the transfer for `url`, discarding any previous result.
    ///
    /// Returns `false` (and changes nothing) while the transfer is in flight.
    pub fn start(&self, url: impl Into<String>) -> bool {
        let mut state = self.lock();
        if matches!(state.status, TransferStatus::Active | TransferStatus::Paused) {
            return false;
        }
        *state = State::new(url.into());
        self.inner.cancelled.store(false, Ordering::Release);
        self.inner.paused.store(false, Ordering::Release);
        true
    }

    pub fn id(&self) -> TransferId {
        self.inner.id
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.lock().status
    }

    pub fn progress(&self) -> Progress {
        let state = self.lock();
        Progress {
            received: state.received,
            total: state.total,
        }
    }

    /// Number of requests issued so far (first attempt plus retries).
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Request cancellation. Idempotent, callable from any thread.
    ///
    /// Takes effect asynchronously for a transfer the engine is driving;
    /// an idle transfer is finished as cancelled immediately.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.wake.notify_one();
        let idle = self.lock().status == TransferStatus::Idle;
        if idle {
            self.finish(Finish::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Ask the engine to stop reading the body until resumed.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
        let mut state = self.lock();
        if state.status == TransferStatus::Active {
            state.status = TransferStatus::Paused;
        }
    }

    /// Clear the pause flag. Use [`crate::TransferEngine::resume`] to also
    /// wake the engine.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        {
            let mut state = self.lock();
            if state.status == TransferStatus::Paused {
                state.status = TransferStatus::Active;
            }
        }
        self.inner.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Terminal outcome, or `None` while the transfer is idle or in flight.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.lock().outcome.clone()
    }

    /// Block until the transfer reaches a terminal outcome.
    pub fn wait(&self) -> TransferOutcome {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .inner
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout` waiting for a terminal outcome.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TransferOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .inner
                .finished
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Install the completion notification target.
    ///
    /// Runs exactly once, on the thread that records the outcome (normally
    /// the engine's reactor). If the transfer already finished, runs now on
    /// the calling thread. Replaces any previously installed callback.
    pub fn on_complete(&self, callback: impl FnOnce(&Transfer) + Send + 'static) {
        let mut state = self.lock();
        if state.outcome.is_some() {
            drop(state);
            callback(self);
        } else {
            state.on_complete = Some(Box::new(callback));
        }
    }

    // Engine-side operations

    pub(crate) fn mark_submitted(&self) -> bool {
        let mut state = self.lock();
        if state.status == TransferStatus::Idle && state.outcome.is_none() {
            state.status = if self.is_paused() {
                TransferStatus::Paused
            } else {
                TransferStatus::Active
            };
            true
        } else {
            false
        }
    }

    /// Start a new request. Returns the byte offset to resume from.
    pub(crate) fn begin_attempt(&self) -> u64 {
        let mut state = self.lock();
        state.attempts += 1;
        state.received
    }

    /// Record the body size reported by the server, first report wins.
    pub(crate) fn set_total(&self, total: u64) {
        let mut state = self.lock();
        if state.total.is_none() {
            state.total = Some(total);
        }
    }

    /// Append a received chunk. Returns `false` if the transfer was
    /// cancelled, in which case nothing is appended.
    pub(crate) fn append(&self, chunk: &[u8]) -> bool {
        let mut state = self.lock();
        if self.is_cancelled() {
            return false;
        }
        state.buffer.extend_from_slice(chunk);
        state.received += chunk.len() as u64;
        true
    }

    pub(crate) fn wake_signal(&self) -> &Notify {
        &self.inner.wake
    }

    /// Record the terminal outcome, wake waiters and fire the callback.
    ///
    /// A transfer whose cancel flag is set always finishes as cancelled and
    /// its buffer is dropped, even if the body was fully received.
    pub(crate) fn finish(&self, finish: Finish) {
        let callback = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return;
            }
            let finish = if self.is_cancelled() {
                Finish::Cancelled
            } else {
                finish
            };
            let outcome = match finish {
                Finish::Completed => {
                    state.status = TransferStatus::Completed;
                    TransferOutcome::Completed(std::mem::take(&mut state.buffer).into())
                }
                Finish::Cancelled => {
                    state.status = TransferStatus::Cancelled;
                    state.buffer = Vec::new();
                    TransferOutcome::Cancelled
                }
                Finish::Failed(err) => {
                    state.status = TransferStatus::Failed;
                    state.buffer = Vec::new();
                    TransferOutcome::Failed(err)
                }
            };
            state.outcome = Some(outcome);
            state.on_complete.take()
        };

        self.inner.finished.notify_all();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Transfer")
            .field("id", &self.inner.id)
            .field("url", &state.url)
            .field("status", &state.status)
            .field("received", &state.received)
            .field("total", &state.total)
            .finish()
    }
}
