//! Multiplexed HTTP downloads for imgview.
//!
//! A [`TransferEngine`] owns one background reactor thread that drives any
//! number of [`Transfer`]s concurrently, capped per host. Producers submit
//! transfers from any thread and observe them through progress polling,
//! blocking waits or a completion callback.
//!
//! ```no_run
//! use imgview_transfer::{EngineConfig, TransferEngine, TransferOutcome};
//!
//! let engine = TransferEngine::new(EngineConfig::default());
//! let transfer = engine.fetch("https://example.com/photo.jpg").unwrap();
//! match transfer.wait() {
//!     TransferOutcome::Completed(bytes) => println!("{} bytes", bytes.len()),
//!     TransferOutcome::Cancelled => println!("cancelled"),
//!     TransferOutcome::Failed(err) => eprintln!("{err}"),
//! }
//! ```

mod config;
mod engine;
mod error;
mod transfer;

pub use config::EngineConfig;
pub use engine::TransferEngine;
pub use error::{EngineError, TransferError};
pub use transfer::{Progress, Transfer, TransferId, TransferOutcome, TransferStatus};
