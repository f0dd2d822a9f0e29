//! Cooperative cancellation for background passes.
//!
//! Long-running work (a window pass, a thumbnail pass, a transfer wait)
//! checks its token at every point where it is about to start a new item
//! or publish a result, and returns early once the token is cancelled.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token shared between the owner of a pass and its workers.
///
/// Clones observe the same flag. Cancelling is one-way; a new pass gets a
/// new token rather than resetting an old one, so a stale worker can never
/// see its pass "come back to life".
///
/// # Example
///
/// ```
/// use imgview_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it.
    ///
    /// Idempotent and safe to call from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether `cancel()` has been called on this token or a clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same underlying flag.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}
