//! Thread-safe FIFO handoff between threads.
//!
//! `TaskQueue` is the only channel the background components use to hand
//! work items and results to each other: the worker pool pulls closures
//! from one, the transfer reactor drains its command queue from one, and
//! the prefetch cache collects pass results in one for the owning thread
//! to drain.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unbounded multi-producer, multi-consumer FIFO queue.
///
/// `push` never blocks beyond the short critical section and `pop`
/// returns immediately whether or not a value was available. `len` and
/// `is_empty` are snapshots and may be stale by the time they are read.
///
/// # Example
///
/// ```
/// use imgview_scheduler::TaskQueue;
///
/// let queue = TaskQueue::new();
/// queue.push(1);
/// queue.push(2);
///
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a value at the back of the queue.
    pub fn push(&self, value: T) {
        self.lock().push_back(value);
    }

    /// Remove and return the value at the front of the queue, if any.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return every value currently queued, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Discard every pending value. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let discarded: Vec<T> = self.drain();
        discarded.len()
    }

    /// Number of queued values (advisory).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty (advisory).
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
