//! Background worker pool.
//!
//! Spawns a fixed number of executors. Each executor loops: claim the next
//! waiting job, resolve parameters per output spec, drive the engine per
//! spec, report the aggregate outcome back to the queue, then trigger
//! cleanup if the job went terminal. Saturation is the only backpressure:
//! when every executor is busy, waiting jobs simply stay queued.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wf_core::{AudioMetadata, ResultStatus, TranscodeResult};
use wf_db::models::JobRow;
use wf_engine::transcode::TranscodeTask;

use crate::cleanup;
use crate::context::AppContext;
use crate::queue::JobQueue;

pub struct WorkerPool {
    ctx: AppContext,
    queue: Arc<JobQueue>,
}

impl WorkerPool {
    pub fn new(ctx: AppContext, queue: Arc<JobQueue>) -> Self {
        Self { ctx, queue }
    }

    /// Spawn the configured number of executors. Each runs until cancelled.
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let n = self.ctx.config.worker.concurrency;
        info!(executors = n, "worker pool starting");

        (0..n)
            .map(|i| {
                let ctx = self.ctx.clone();
                let queue = Arc::clone(&self.queue);
                let cancel = cancel.clone();
                tokio::spawn(run_executor(format!("worker-{i}"), ctx, queue, cancel))
            })
            .collect()
    }
}

/// One executor loop.
async fn run_executor(
    worker_id: String,
    ctx: AppContext,
    queue: Arc<JobQueue>,
    cancel: CancellationToken,
) {
    info!(worker = %worker_id, "executor started");
    let poll_interval = Duration::from_secs(ctx.config.worker.poll_interval_secs);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match process_next(&worker_id, &ctx, &queue).await {
            Ok(true) => {
                // Processed a job; immediately check for the next one.
                continue;
            }
            Ok(false) => {
                // No jobs available; wait before polling again.
            }
            Err(e) => {
                error!(worker = %worker_id, "executor error: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancel.cancelled() => { break; }
        }
    }

    info!(worker = %worker_id, "executor stopped");
}

/// Try to claim and process one job.
///
/// Returns `Ok(true)` if a job was processed, `Ok(false)` if none was
/// available.
async fn process_next(
    worker_id: &str,
    ctx: &AppContext,
    queue: &JobQueue,
) -> wf_core::Result<bool> {
    let Some(job) = queue.claim(worker_id)? else {
        return Ok(false);
    };

    let results = execute_job(ctx, queue, &job).await;
    let state = queue.report_outcome(&job, &results)?;

    if state.is_terminal() {
        let mut terminal = job;
        terminal.results = serde_json::to_string(&results).ok();
        cleanup::cleanup(&JobQueue::terminal_cleanup_paths(&terminal));
    }

    Ok(true)
}

/// Run every output spec of one claimed job, collecting one result each.
///
/// Specs run sequentially; a spec failure does not stop later specs, so the
/// result list always covers the full fan-out.
async fn execute_job(ctx: &AppContext, queue: &JobQueue, job: &JobRow) -> Vec<TranscodeResult> {
    let specs = job.parsed_specs();
    let input = PathBuf::from(&job.input_path);

    let source = match ctx.engine.probe(&input).await {
        Ok(info) => info,
        Err(e) => {
            warn!(job_id = %job.id, "source probe failed: {e}");
            return specs
                .iter()
                .map(|spec| failed_entry(spec.format, 0, format!("source probe failed: {e}")))
                .collect();
        }
    };

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let output_dir = ctx
        .config
        .storage
        .output_root
        .join(&job.owner_id)
        .join(&job.subject_id);

    let total = specs.len() as f64;
    let mut results = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        let started = Instant::now();

        let params = match wf_engine::params::resolve(spec) {
            Ok(p) => p,
            Err(e) => {
                results.push(failed_entry(
                    spec.format,
                    started.elapsed().as_millis() as u64,
                    e.to_string(),
                ));
                continue;
            }
        };

        let task = TranscodeTask {
            input: input.clone(),
            output: output_dir.join(format!("{stem}.{}", spec.format.as_str())),
            params,
            input_duration_seconds: source.duration_seconds,
        };

        // Map per-spec progress onto the job's overall percentage. Report
        // failures are logged, never fatal to the encode.
        let job_id = job.id;
        let base = index as f64 * 100.0;
        let on_progress = move |percent: f64, q: &JobQueue| {
            let overall = (base + percent.clamp(0.0, 100.0)) / total;
            if let Err(e) = q.report_progress(job_id, overall) {
                debug!(job_id = %job_id, "progress update failed: {e}");
            }
        };

        let outcome = ctx
            .engine
            .transcode(&task, &|p| on_progress(p, queue))
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(outcome) if outcome.succeeded => {
                let probed = outcome.probed.unwrap_or_else(|| wf_engine::AudioInfo {
                    duration_seconds: None,
                    size_bytes: None,
                    metadata: AudioMetadata::default(),
                });
                TranscodeResult {
                    format: spec.format,
                    output_path: Some(task.output.to_string_lossy().to_string()),
                    duration_seconds: probed.duration_seconds,
                    size_bytes: probed.size_bytes,
                    metadata: probed.metadata,
                    processing_time_ms: elapsed_ms,
                    status: ResultStatus::Success,
                    error: None,
                }
            }
            Ok(outcome) => failed_entry(
                spec.format,
                elapsed_ms,
                outcome.error.unwrap_or_else(|| "transcode failed".into()),
            ),
            // Environmental failure (e.g. missing binary); counts toward the
            // same attempt budget as engine failures.
            Err(e) => failed_entry(spec.format, elapsed_ms, e.to_string()),
        };

        results.push(result);
    }

    results
}

fn failed_entry(
    format: wf_core::AudioFormat,
    processing_time_ms: u64,
    error: String,
) -> TranscodeResult {
    TranscodeResult {
        format,
        output_path: None,
        duration_seconds: None,
        size_bytes: None,
        metadata: AudioMetadata::default(),
        processing_time_ms,
        status: ResultStatus::Failed,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wf_core::config::Config;
    use wf_core::{AudioFormat, JobRequest, JobState, OutputOptions, OutputSpec};
    use wf_engine::probe::AudioInfo;
    use wf_engine::transcode::{Engine, EngineOutcome};

    /// Engine stub with a scripted failure budget and per-format failures.
    struct ScriptedEngine {
        /// Number of transcode invocations that fail before any succeed.
        failures_remaining: AtomicU32,
        /// Formats that always fail regardless of the budget.
        always_fail: Vec<AudioFormat>,
    }

    impl ScriptedEngine {
        fn succeeding() -> Self {
            Self {
                failures_remaining: AtomicU32::new(0),
                always_fail: Vec::new(),
            }
        }

        fn failing_first(n: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(n),
                always_fail: Vec::new(),
            }
        }

        fn failing_formats(formats: Vec<AudioFormat>) -> Self {
            Self {
                failures_remaining: AtomicU32::new(0),
                always_fail: formats,
            }
        }

        fn take_failure(&self) -> bool {
            self.failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait::async_trait]
    impl Engine for ScriptedEngine {
        async fn probe(&self, path: &Path) -> wf_core::Result<AudioInfo> {
            if !path.exists() {
                return Err(wf_core::Error::Probe(format!(
                    "no such file: {}",
                    path.display()
                )));
            }
            Ok(AudioInfo {
                duration_seconds: Some(10.0),
                size_bytes: Some(1_000),
                metadata: AudioMetadata {
                    codec: Some("pcm_s16le".into()),
                    sample_rate: Some(44_100),
                    channels: Some(2),
                    bitrate_kbps: None,
                },
            })
        }

        async fn transcode(
            &self,
            task: &TranscodeTask,
            on_progress: &(dyn Fn(f64) + Send + Sync),
        ) -> wf_core::Result<EngineOutcome> {
            if self.always_fail.contains(&task.params.format) || self.take_failure() {
                return Ok(EngineOutcome::failure("scripted engine failure"));
            }

            on_progress(50.0);
            if let Some(parent) = task.output.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&task.output, b"encoded").unwrap();
            on_progress(100.0);

            Ok(EngineOutcome::success(AudioInfo {
                duration_seconds: Some(10.0),
                size_bytes: Some(7),
                metadata: AudioMetadata {
                    codec: Some(task.params.codec.clone()),
                    sample_rate: Some(task.params.sample_rate),
                    channels: Some(task.params.channels),
                    bitrate_kbps: task.params.bitrate_kbps,
                },
            }))
        }
    }

    struct Harness {
        ctx: AppContext,
        queue: Arc<JobQueue>,
        input_dir: tempfile::TempDir,
        output_dir: tempfile::TempDir,
    }

    fn harness(engine: ScriptedEngine) -> Harness {
        let input_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.storage.output_root = output_dir.path().to_path_buf();
        // Zero base delay so released retries are immediately claimable.
        config.retry.base_delay_secs = 0;

        let ctx = AppContext::with_engine(config, Arc::new(engine)).unwrap();
        let queue = Arc::new(JobQueue::new(ctx.clone()));
        Harness {
            ctx,
            queue,
            input_dir,
            output_dir,
        }
    }

    fn submit(h: &Harness, formats: &[AudioFormat]) -> (wf_core::JobId, PathBuf) {
        let input = h.input_dir.path().join("track.wav");
        std::fs::write(&input, b"fake audio").unwrap();
        let req = JobRequest {
            owner_id: "owner-1".into(),
            subject_id: "track-1".into(),
            input_path: input.clone(),
            output_specs: formats
                .iter()
                .map(|&format| OutputSpec {
                    format,
                    options: OutputOptions::default(),
                })
                .collect(),
        };
        (h.queue.enqueue(&req).unwrap(), input)
    }

    /// Drive the pipeline to a terminal state, releasing backoff delays
    /// between attempts the way the maintenance sweep would.
    async fn run_to_terminal(h: &Harness) -> JobState {
        for _ in 0..10 {
            while process_next("test-worker", &h.ctx, &h.queue).await.unwrap() {}
            let jobs = h.queue.list(None, None, 0, 10).unwrap();
            if let Some(job) = jobs.first() {
                if job.state.is_terminal() {
                    return job.state;
                }
            }
            h.queue.run_maintenance().unwrap();
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn single_format_success() {
        let h = harness(ScriptedEngine::succeeding());
        let (id, input) = submit(&h, &[AudioFormat::Mp3]);

        assert_eq!(run_to_terminal(&h).await, JobState::Completed);

        let snapshot = h.queue.get_status(id).unwrap();
        assert_eq!(snapshot.attempts, 1);
        let results = snapshot.results.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].format, AudioFormat::Mp3);
        assert!(results[0].is_success());
        assert_eq!(results[0].metadata.sample_rate, Some(44_100));
        assert_eq!(results[0].metadata.channels, Some(2));

        let artifact = h
            .output_dir
            .path()
            .join("owner-1/track-1/track.mp3");
        assert!(artifact.exists());
        // Terminal cleanup removed the transient input.
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let h = harness(ScriptedEngine::failing_first(2));
        let (id, _input) = submit(&h, &[AudioFormat::Mp3]);

        assert_eq!(run_to_terminal(&h).await, JobState::Completed);

        let snapshot = h.queue.get_status(id).unwrap();
        assert_eq!(snapshot.attempts, 3);
        assert!(snapshot.results.unwrap()[0].is_success());
    }

    #[tokio::test]
    async fn fails_after_attempt_budget() {
        let h = harness(ScriptedEngine::failing_first(u32::MAX));
        let (id, input) = submit(&h, &[AudioFormat::Mp3]);

        assert_eq!(run_to_terminal(&h).await, JobState::Failed);

        let snapshot = h.queue.get_status(id).unwrap();
        assert_eq!(snapshot.attempts, 3);
        assert!(snapshot
            .failure_reason
            .unwrap()
            .contains("scripted engine failure"));
        assert!(!input.exists());
        // No jobs left claimable.
        assert!(h.queue.claim("w-extra").unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_artifact() {
        let h = harness(ScriptedEngine::failing_formats(vec![AudioFormat::Ogg]));
        let (id, input) = submit(&h, &[AudioFormat::Mp3, AudioFormat::Ogg]);

        assert_eq!(run_to_terminal(&h).await, JobState::Failed);

        let snapshot = h.queue.get_status(id).unwrap();
        let results = snapshot.results.unwrap();
        assert_eq!(results.len(), 2);

        let mp3 = results.iter().find(|r| r.format == AudioFormat::Mp3).unwrap();
        assert!(mp3.is_success());
        let ogg = results.iter().find(|r| r.format == AudioFormat::Ogg).unwrap();
        assert!(!ogg.is_success());

        // The successful artifact survives for format-selective recovery.
        let mp3_artifact = h.output_dir.path().join("owner-1/track-1/track.mp3");
        assert!(mp3_artifact.exists());
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn unreadable_input_fails_every_spec() {
        let h = harness(ScriptedEngine::succeeding());
        let (id, input) = submit(&h, &[AudioFormat::Mp3, AudioFormat::Flac]);
        // Input disappears between enqueue and execution.
        std::fs::remove_file(&input).unwrap();

        assert_eq!(run_to_terminal(&h).await, JobState::Failed);

        let snapshot = h.queue.get_status(id).unwrap();
        let results = snapshot.results.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_success()));
        assert!(snapshot.failure_reason.unwrap().contains("probe failed"));
    }

    #[tokio::test]
    async fn progress_is_recorded() {
        let h = harness(ScriptedEngine::succeeding());
        let (id, _input) = submit(&h, &[AudioFormat::Mp3]);

        let job = h.queue.claim("w1").unwrap().unwrap();
        let results = execute_job(&h.ctx, &h.queue, &job).await;

        // The stub reported 50% mid-encode; the row shows the max seen while
        // active (100% arrives only with the terminal transition).
        let snapshot = h.queue.get_status(id).unwrap();
        assert!(snapshot.progress_percent >= 50.0);
        assert!(results[0].is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_drains_queue_and_stops() {
        let h = harness(ScriptedEngine::succeeding());
        let mut ids = Vec::new();
        for i in 0..4 {
            let input = h.input_dir.path().join(format!("track-{i}.wav"));
            std::fs::write(&input, b"fake audio").unwrap();
            let req = JobRequest {
                owner_id: "owner-1".into(),
                subject_id: format!("track-{i}"),
                input_path: input,
                output_specs: vec![OutputSpec {
                    format: AudioFormat::Mp3,
                    options: OutputOptions::default(),
                }],
            };
            ids.push(h.queue.enqueue(&req).unwrap());
        }

        let pool = WorkerPool::new(h.ctx.clone(), Arc::clone(&h.queue));
        let cancel = CancellationToken::new();
        let handles = pool.spawn(cancel.clone());

        // Wait for all jobs to complete.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let done = ids
                .iter()
                .all(|&id| h.queue.get_status(id).unwrap().state == JobState::Completed);
            if done {
                break;
            }
            assert!(Instant::now() < deadline, "jobs did not drain in time");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
