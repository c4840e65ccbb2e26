//! Waveforge - asynchronous audio transcoding pipeline
//!
//! This library crate exposes the queue, worker pool, and cleanup service
//! for integration testing.

pub mod cleanup;
pub mod context;
pub mod queue;
pub mod worker;

pub use context::AppContext;
pub use queue::{JobQueue, RetryPolicy};
pub use worker::WorkerPool;
