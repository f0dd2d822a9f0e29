//! imgview scheduler library
//!
//! Concurrency primitives shared by the transfer engine and the prefetch
//! cache:
//!
//! - [`TaskQueue`]: unbounded FIFO handoff between threads.
//! - [`CancellationToken`]: cooperative cancellation flag for a pass.
//! - [`WorkerPool`]: resizable set of persistent worker threads with
//!   graceful drain (`wait`) and hard cancel (`kill`).
//!
//! # Example
//!
//! ```
//! use imgview_scheduler::{CancellationToken, TaskQueue, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(2));
//! let results = Arc::new(TaskQueue::new());
//! let token = CancellationToken::new();
//!
//! for index in 0..4 {
//!     let results = results.clone();
//!     let token = token.clone();
//!     pool.submit(move || {
//!         if !token.is_cancelled() {
//!             results.push(index);
//!         }
//!     });
//! }
//!
//! pool.wait();
//! assert_eq!(results.len(), 4);
//! ```

mod cancel;
mod pool;
mod queue;

pub use cancel::CancellationToken;
pub use pool::{
    default_worker_count, PoolState, PoolStats, TaskHandle, TaskPoll, WorkerPool,
    WorkerPoolConfig,
};
pub use queue::TaskQueue;
