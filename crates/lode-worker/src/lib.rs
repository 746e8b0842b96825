//! The Lode worker.
//!
//! A [`Worker`] repeats one pass per poll interval:
//!
//! 1. ask the scheduler for a claim
//! 2. fetch the blob's header and trailer once
//! 3. read the unread range in chunks, emitting each chunk (raw mode) or
//!    each parsed JSON unit (json mode) to the [`OutputSink`]
//! 4. checkpoint the offset every `checkpoint_every` entries
//! 5. write a final checkpoint that hands the blob back, even on failure
//!
//! A failed pass is logged and the loop moves on. On shutdown the worker
//! releases every claim it still holds.

pub mod config;
pub mod error;
pub mod sink;
pub mod worker;

pub use config::{ContentMode, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use sink::{OutputSink, Record, VecSink};
pub use worker::{PassOutcome, Worker};
