//! Shared application context.
//!
//! [`AppContext`] bundles the infrastructure every component needs: the
//! database pool, the immutable configuration snapshot, the event bus, and
//! the transcoding engine. It is cheaply cloneable because it only holds
//! `Arc`s and the pool handle.

use std::sync::Arc;
use std::time::Duration;

use wf_core::config::Config;
use wf_core::events::EventBus;
use wf_db::pool::{self, DbPool};
use wf_engine::{Engine, FfmpegEngine, ToolRegistry};

#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Broadcast event bus for job lifecycle events.
    pub event_bus: Arc<EventBus>,
    /// Transcoding engine.
    pub engine: Arc<dyn Engine>,
}

impl AppContext {
    /// Build the production context: file-backed database and ffmpeg engine.
    pub fn new(config: Config) -> wf_core::Result<Self> {
        let db = pool::init_pool(&config.storage.db_path.to_string_lossy())?;
        let registry = ToolRegistry::discover(&config.tools);
        let engine = FfmpegEngine::new(
            registry,
            Duration::from_secs(config.worker.stall_timeout_secs),
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::default()),
            engine: Arc::new(engine),
        })
    }

    /// Build a context around an existing engine (used by tests to run the
    /// pipeline against a scripted engine and an in-memory database).
    pub fn with_engine(config: Config, engine: Arc<dyn Engine>) -> wf_core::Result<Self> {
        let db = pool::init_memory_pool()?;
        Ok(Self {
            db,
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::default()),
            engine,
        })
    }
}
