//! End-to-end lifecycle tests through the public library API: enqueue jobs,
//! run the worker pool against a scripted engine, and observe terminal
//! snapshots.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use waveforge::{AppContext, JobQueue, WorkerPool};
use wf_core::config::Config;
use wf_core::{
    AudioFormat, AudioMetadata, JobRequest, JobState, OutputOptions, OutputSpec,
};
use wf_engine::probe::AudioInfo;
use wf_engine::transcode::{Engine, EngineOutcome, TranscodeTask};

/// Engine that fails a fixed number of invocations, then succeeds.
struct FlakyEngine {
    failures_remaining: AtomicU32,
}

impl FlakyEngine {
    fn new(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait::async_trait]
impl Engine for FlakyEngine {
    async fn probe(&self, path: &Path) -> wf_core::Result<AudioInfo> {
        if !path.exists() {
            return Err(wf_core::Error::Probe("missing input".into()));
        }
        Ok(AudioInfo {
            duration_seconds: Some(30.0),
            size_bytes: Some(5_000),
            metadata: AudioMetadata::default(),
        })
    }

    async fn transcode(
        &self,
        task: &TranscodeTask,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> wf_core::Result<EngineOutcome> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Ok(EngineOutcome::failure("transient encoder failure"));
        }

        on_progress(100.0);
        if let Some(parent) = task.output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&task.output, b"encoded").unwrap();
        Ok(EngineOutcome::success(AudioInfo {
            duration_seconds: Some(30.0),
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

struct Pipeline {
    queue: Arc<JobQueue>,
    ctx: AppContext,
    _input_dir: tempfile::TempDir,
    _output_dir: tempfile::TempDir,
    input: std::path::PathBuf,
}

fn pipeline(engine: FlakyEngine) -> Pipeline {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let input = input_dir.path().join("song.wav");
    std::fs::write(&input, b"pcm bytes").unwrap();

    let mut config = Config::default();
    config.storage.output_root = output_dir.path().to_path_buf();
    config.worker.poll_interval_secs = 1;
    config.retry.base_delay_secs = 0;
    config.retention.sweep_interval_secs = 1;

    let ctx = AppContext::with_engine(config, Arc::new(engine)).unwrap();
    let queue = Arc::new(JobQueue::new(ctx.clone()));
    Pipeline {
        queue,
        ctx,
        _input_dir: input_dir,
        _output_dir: output_dir,
        input,
    }
}

async fn wait_terminal(p: &Pipeline, id: wf_core::JobId) -> JobState {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let snapshot = p.queue.get_status(id).unwrap();
        if snapshot.state.is_terminal() {
            return snapshot.state;
        }
        assert!(Instant::now() < deadline, "job stuck in {}", snapshot.state);
        // Release any backoff delay so retries are picked up promptly.
        p.queue.run_maintenance().unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn job_completes_through_worker_pool() {
    let p = pipeline(FlakyEngine::new(0));
    let id = p
        .queue
        .enqueue(&JobRequest {
            owner_id: "alice".into(),
            subject_id: "song-9".into(),
            input_path: p.input.clone(),
            output_specs: vec![OutputSpec {
                format: AudioFormat::Mp3,
                options: OutputOptions {
                    bitrate_kbps: Some(192),
                    ..Default::default()
                },
            }],
        })
        .unwrap();

    let cancel = CancellationToken::new();
    let handles = WorkerPool::new(p.ctx.clone(), Arc::clone(&p.queue)).spawn(cancel.clone());

    assert_eq!(wait_terminal(&p, id).await, JobState::Completed);

    let snapshot = p.queue.get_status(id).unwrap();
    assert_eq!(snapshot.attempts, 1);
    assert!((snapshot.progress_percent - 100.0).abs() < f64::EPSILON);
    let results = snapshot.results.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].metadata.bitrate_kbps, Some(192));

    cancel.cancel();
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn job_retries_then_completes() {
    let p = pipeline(FlakyEngine::new(2));
    let id = p
        .queue
        .enqueue(&JobRequest {
            owner_id: "alice".into(),
            subject_id: "song-9".into(),
            input_path: p.input.clone(),
            output_specs: vec![OutputSpec {
                format: AudioFormat::Flac,
                options: OutputOptions::default(),
            }],
        })
        .unwrap();

    let cancel = CancellationToken::new();
    let handles = WorkerPool::new(p.ctx.clone(), Arc::clone(&p.queue)).spawn(cancel.clone());

    assert_eq!(wait_terminal(&p, id).await, JobState::Completed);
    let snapshot = p.queue.get_status(id).unwrap();
    assert_eq!(snapshot.attempts, 3);

    cancel.cancel();
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn snapshot_redaction_for_external_callers() {
    let p = pipeline(FlakyEngine::new(0));
    let id = p
        .queue
        .enqueue(&JobRequest {
            owner_id: "alice".into(),
            subject_id: "song-9".into(),
            input_path: p.input.clone(),
            output_specs: vec![OutputSpec {
                format: AudioFormat::Mp3,
                options: OutputOptions::default(),
            }],
        })
        .unwrap();

    let snapshot = p.queue.get_status(id).unwrap().redacted();
    assert!(snapshot.input_path.is_none());
}
