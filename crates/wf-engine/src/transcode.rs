//! The transcoding engine seam and its ffmpeg implementation.
//!
//! [`Engine`] is what the worker pool programs against. [`FfmpegEngine`]
//! shells out to ffmpeg with `-progress pipe:2` so per-encode progress can be
//! derived from the stderr stream. Engine-level failures (bad input, encoder
//! error, stall) are reported as an [`EngineOutcome`] rather than `Err`, so
//! the caller can record them as a per-format result; `Err` is reserved for
//! environmental problems like a missing binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::command::ToolCommand;
use crate::params::ResolvedParams;
use crate::probe::{self, AudioInfo};
use crate::tools::ToolRegistry;
use wf_core::Result;

/// One encode: a source file, a destination, and resolved parameters.
#[derive(Debug, Clone)]
pub struct TranscodeTask {
    pub input: PathBuf,
    pub output: PathBuf,
    pub params: ResolvedParams,
    /// Source duration, used to turn encode position into a percentage.
    pub input_duration_seconds: Option<f64>,
}

/// Result of running one encode to completion (successfully or not).
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub succeeded: bool,
    /// Probed facts about the produced artifact; present only on success.
    pub probed: Option<AudioInfo>,
    pub error: Option<String>,
}

impl EngineOutcome {
    pub fn success(probed: AudioInfo) -> Self {
        Self {
            succeeded: true,
            probed: Some(probed),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            probed: None,
            error: Some(error.into()),
        }
    }
}

/// Transcoding backend abstraction.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Inspect an audio file.
    async fn probe(&self, path: &Path) -> Result<AudioInfo>;

    /// Run one encode, reporting progress percentages through `on_progress`.
    async fn transcode(
        &self,
        task: &TranscodeTask,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<EngineOutcome>;
}

/// Engine implementation shelling out to ffmpeg/ffprobe.
pub struct FfmpegEngine {
    registry: ToolRegistry,
    stall_timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(registry: ToolRegistry, stall_timeout: Duration) -> Self {
        Self {
            registry,
            stall_timeout,
        }
    }
}

#[async_trait]
impl Engine for FfmpegEngine {
    async fn probe(&self, path: &Path) -> Result<AudioInfo> {
        probe::probe_file(&self.registry, path).await
    }

    async fn transcode(
        &self,
        task: &TranscodeTask,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<EngineOutcome> {
        let ffmpeg = self.registry.require("ffmpeg")?;

        if let Some(parent) = task.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = ToolCommand::new(ffmpeg.clone());
        // Progress key=value blocks on stderr; -nostats suppresses the usual
        // carriage-return status line so line-based reading works. Global
        // options go before the input/output arguments.
        cmd.arg("-progress").arg("pipe:2").arg("-nostats");
        cmd.args(task.params.to_ffmpeg_args(&task.input, &task.output));
        cmd.timeout(self.stall_timeout);

        debug!(output = %task.output.display(), codec = %task.params.codec, "starting encode");

        let duration = task.input_duration_seconds;
        let stream = cmd
            .execute_streaming(&move |line| {
                if let Some(percent) = progress_percent(line, duration) {
                    on_progress(percent);
                }
            })
            .await;

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                // Stall or I/O failure; the partial artifact is useless.
                remove_artifact(&task.output).await;
                return Ok(EngineOutcome::failure(e.to_string()));
            }
        };

        if !stream.status.success() {
            remove_artifact(&task.output).await;
            return Ok(EngineOutcome::failure(format!(
                "ffmpeg exited with {}: {}",
                stream.status,
                stream.stderr_summary()
            )));
        }

        // Verify the artifact is a readable audio file before declaring
        // success.
        match probe::probe_file(&self.registry, &task.output).await {
            Ok(info) => {
                on_progress(100.0);
                Ok(EngineOutcome::success(info))
            }
            Err(e) => {
                warn!(output = %task.output.display(), "produced artifact failed verification: {e}");
                remove_artifact(&task.output).await;
                Ok(EngineOutcome::failure(format!(
                    "artifact verification failed: {e}"
                )))
            }
        }
    }
}

async fn remove_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "failed to remove partial artifact: {e}");
        }
    }
}

/// Map one `-progress` stderr line to a completion percentage.
///
/// Live progress is capped just below 100 so only a verified artifact ever
/// reports completion. Returns `None` for lines that carry no position and
/// when the source duration is unknown.
fn progress_percent(line: &str, input_duration_seconds: Option<f64>) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => {
            let duration = input_duration_seconds.filter(|d| *d > 0.0)?;
            let micros: i64 = value.parse().ok()?;
            let percent = (micros as f64 / 1_000_000.0) / duration * 100.0;
            Some(percent.clamp(0.0, 99.0))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_from_out_time() {
        let percent = progress_percent("out_time_us=90000000", Some(180.0)).unwrap();
        assert!((percent - 50.0).abs() < 0.01);
    }

    #[test]
    fn progress_caps_below_hundred() {
        let percent = progress_percent("out_time_us=200000000", Some(180.0)).unwrap();
        assert!((percent - 99.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_needs_duration() {
        assert!(progress_percent("out_time_us=1000000", None).is_none());
        assert!(progress_percent("out_time_us=1000000", Some(0.0)).is_none());
    }

    #[test]
    fn irrelevant_lines_ignored() {
        assert!(progress_percent("bitrate=192.0kbits/s", Some(180.0)).is_none());
        assert!(progress_percent("progress=continue", Some(180.0)).is_none());
        assert!(progress_percent("frame=42", Some(180.0)).is_none());
        assert!(progress_percent("", Some(180.0)).is_none());
    }

    #[test]
    fn negative_position_clamps_to_zero() {
        // ffmpeg can emit out_time_us=-9223372036854775808 before the first
        // frame is written.
        let percent = progress_percent("out_time_us=-9223372036854775808", Some(180.0)).unwrap();
        assert!((percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn outcome_constructors() {
        let ok = EngineOutcome::success(AudioInfo {
            duration_seconds: Some(10.0),
            size_bytes: Some(1000),
            metadata: Default::default(),
        });
        assert!(ok.succeeded);
        assert!(ok.probed.is_some());

        let bad = EngineOutcome::failure("encoder blew up");
        assert!(!bad.succeeded);
        assert_eq!(bad.error.as_deref(), Some("encoder blew up"));
    }
}
