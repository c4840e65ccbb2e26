//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for storage, workers, retry, retention, and tools. Every
//! section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub retention: RetentionConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.worker.concurrency == 0 {
            warnings.push("worker.concurrency is 0; no jobs will be processed".into());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; every job will fail immediately".into());
        }
        if self.worker.stall_timeout_secs < 10 {
            warnings.push(format!(
                "worker.stall_timeout_secs {} is very low; long encodes will be killed",
                self.worker.stall_timeout_secs
            ));
        }
        if self.worker.visibility_timeout_secs <= self.worker.stall_timeout_secs {
            warnings.push(
                "worker.visibility_timeout_secs should exceed stall_timeout_secs, \
                 otherwise healthy claims may be reclaimed mid-encode"
                    .into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Database and filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file for the job queue.
    pub db_path: PathBuf,
    /// Root for uploaded source files, namespaced per owner.
    pub input_root: PathBuf,
    /// Root for produced artifacts, namespaced per owner and subject.
    pub output_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/data/waveforge.db"),
            input_root: PathBuf::from("/data/uploads"),
            output_root: PathBuf::from("/data/outputs"),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent executors.
    pub concurrency: usize,
    /// Idle poll interval when the queue is empty.
    pub poll_interval_secs: u64,
    /// Engine invocations with no progress within this window are failed.
    pub stall_timeout_secs: u64,
    /// Active claims older than this with no progress update are returned
    /// to `waiting` by the maintenance sweep.
    pub visibility_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval_secs: 2,
            stall_timeout_secs: 600,
            visibility_timeout_secs: 1800,
        }
    }
}

/// Retry and backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum execution attempts per job.
    pub max_attempts: u32,
    /// Base backoff delay; the k-th retry waits `base * 2^(k-1)`.
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5,
        }
    }
}

/// Terminal-job retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Completed jobs are kept at least this long.
    pub completed_hours: u64,
    /// Optional cap on retained completed rows (oldest purged first).
    pub completed_max_rows: Option<u64>,
    /// Failed jobs are kept at least this long to support diagnosis.
    pub failed_days: u64,
    /// How often the maintenance sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_hours: 24,
            completed_max_rows: Some(10_000),
            failed_days: 7,
            sweep_interval_secs: 30,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}
