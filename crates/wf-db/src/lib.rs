//! wf-db: database access and persistence layer.
//!
//! This crate provides SQLite-backed storage for the job queue with
//! connection pooling, embedded migrations, typed models, and query modules.
//! Job rows survive process restarts; `active` claims left behind by a crash
//! are reclaimed by the queue's maintenance sweep.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
