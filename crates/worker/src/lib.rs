//! Debounced batching work queues on the tokio runtime.
//!
//! * `BatchingWorkQueue`: coalesces items added by any number of producers
//!   and hands them, one batch at a time, to an async callback
//! * `WorkQueueSpec`: name, debounce delay, and optional deduplication
//! * `CancellationSeries`: chain of per-batch cancellation tokens
//!
//! Queues spawn their worker on the ambient tokio runtime, or on a small
//! shared runtime when constructed outside of one.

#![warn(missing_docs)]

pub mod batch_queue;
mod error;
mod spawn;
mod token;

pub use batch_queue::{BatchingWorkQueue, QueueStats, WorkQueueSpec};
pub use error::{BatchError, BatchResult};
pub use spawn::spawn;
pub use token::CancellationSeries;
pub use tokio_util::sync::CancellationToken;
