//! Durable job queue.
//!
//! [`JobQueue`] is the single owner of job records: submission, claiming,
//! progress updates, and terminal transitions all go through it, backed by
//! atomic single-statement updates in `wf_db`. Workers hold a transient
//! reference to a claimed row and must report outcomes back here rather than
//! touching state themselves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wf_core::events::EventPayload;
use wf_core::{Error, JobId, JobRequest, JobSnapshot, JobState, Result, TranscodeResult};
use wf_db::models::JobRow;
use wf_db::pool::get_conn;
use wf_db::queries::jobs;

use crate::context::AppContext;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff policy for failed attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &wf_core::config::RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_secs(cfg.base_delay_secs),
        }
    }

    /// Delay before the retry following failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

pub struct JobQueue {
    ctx: AppContext,
    retry: RetryPolicy,
}

impl JobQueue {
    pub fn new(ctx: AppContext) -> Self {
        let retry = RetryPolicy::from_config(&ctx.config.retry);
        Self { ctx, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Validate and persist a new job in `waiting` state.
    ///
    /// Rejections here (bad format, out-of-range option, unreadable input)
    /// happen before a job record exists and are never retried.
    pub fn enqueue(&self, request: &JobRequest) -> Result<JobId> {
        request.validate()?;

        // Resolve every spec up front so a job that could never encode is
        // rejected at submission instead of burning attempts.
        for spec in &request.output_specs {
            wf_engine::params::resolve(spec)?;
        }

        let meta = std::fs::metadata(&request.input_path).map_err(|e| {
            Error::validation(format!(
                "input {} is not readable: {e}",
                request.input_path.display()
            ))
        })?;
        if !meta.is_file() {
            return Err(Error::validation(format!(
                "input {} is not a file",
                request.input_path.display()
            )));
        }

        let specs_json = serde_json::to_string(&request.output_specs)
            .map_err(|e| Error::Internal(format!("failed to serialize output specs: {e}")))?;

        let conn = get_conn(&self.ctx.db)?;
        let row = jobs::create_job(
            &conn,
            &request.owner_id,
            &request.subject_id,
            &request.input_path.to_string_lossy(),
            &specs_json,
            self.retry.max_attempts,
        )?;

        info!(job_id = %row.id, owner = %row.owner_id, specs = request.output_specs.len(), "job queued");
        self.ctx
            .event_bus
            .broadcast(EventPayload::JobQueued { job_id: row.id });

        Ok(row.id)
    }

    /// Claim the next waiting job for `worker`, marking it `active`.
    pub fn claim(&self, worker: &str) -> Result<Option<JobRow>> {
        let conn = get_conn(&self.ctx.db)?;
        let claimed = jobs::dequeue_next(&conn, worker)?;

        if let Some(ref job) = claimed {
            info!(job_id = %job.id, worker, attempt = job.attempts, "job claimed");
            self.ctx.event_bus.broadcast(EventPayload::JobStarted {
                job_id: job.id,
                attempt: job.attempts,
            });
        }

        Ok(claimed)
    }

    /// Record a progress update for an active job.
    ///
    /// Also refreshes the claim lock, so regular progress reports keep the
    /// job from being reclaimed as stale.
    pub fn report_progress(&self, id: JobId, percent: f64) -> Result<()> {
        let conn = get_conn(&self.ctx.db)?;
        if jobs::update_progress(&conn, id, percent)? {
            self.ctx.event_bus.broadcast(EventPayload::JobProgress {
                job_id: id,
                progress: percent,
            });
        }
        Ok(())
    }

    /// Report the outcome of one execution attempt and transition the job.
    ///
    /// The job completes only if every per-format result succeeded. On
    /// failure it is delayed for the backoff window while attempts remain,
    /// and marked `failed` once the attempt budget is spent. The per-format
    /// result list is stored either way so partial successes stay queryable.
    pub fn report_outcome(
        &self,
        job: &JobRow,
        results: &[TranscodeResult],
    ) -> Result<JobState> {
        let results_json = serde_json::to_string(results)
            .map_err(|e| Error::Internal(format!("failed to serialize results: {e}")))?;

        let conn = get_conn(&self.ctx.db)?;

        if results.iter().all(|r| r.is_success()) {
            jobs::complete_job(&conn, job.id, &results_json)?;
            info!(job_id = %job.id, attempt = job.attempts, "job completed");
            self.ctx
                .event_bus
                .broadcast(EventPayload::JobCompleted { job_id: job.id });
            return Ok(JobState::Completed);
        }

        let reason = results
            .iter()
            .filter(|r| !r.is_success())
            .filter_map(|r| r.error.as_deref())
            .collect::<Vec<_>>()
            .join("; ");
        let reason = if reason.is_empty() {
            "transcode failed".to_string()
        } else {
            reason
        };

        if job.attempts < job.max_attempts {
            let delay = self.retry.backoff_delay(job.attempts);
            let delay_chrono = chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let until = (Utc::now() + delay_chrono).to_rfc3339();
            jobs::delay_job(&conn, job.id, &until, Some(&results_json))?;
            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                retry_in = ?delay,
                "attempt failed, retrying: {reason}"
            );
            self.ctx.event_bus.broadcast(EventPayload::JobDelayed {
                job_id: job.id,
                attempt: job.attempts,
                retry_in_secs: delay.as_secs(),
            });
            Ok(JobState::Delayed)
        } else {
            jobs::fail_job(&conn, job.id, &reason, Some(&results_json))?;
            error!(job_id = %job.id, attempts = job.attempts, "job failed: {reason}");
            self.ctx.event_bus.broadcast(EventPayload::JobFailed {
                job_id: job.id,
                error: reason,
            });
            Ok(JobState::Failed)
        }
    }

    /// Read-only status snapshot; never blocks on running work.
    pub fn get_status(&self, id: JobId) -> Result<JobSnapshot> {
        let conn = get_conn(&self.ctx.db)?;
        jobs::get_job(&conn, id)?
            .map(JobRow::into_snapshot)
            .ok_or_else(|| Error::not_found("job", id))
    }

    /// List jobs for operational visibility.
    pub fn list(
        &self,
        owner_id: Option<&str>,
        state: Option<JobState>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<JobSnapshot>> {
        let conn = get_conn(&self.ctx.db)?;
        let rows = jobs::list_jobs(
            &conn,
            owner_id,
            state.map(|s| s.as_str()),
            offset,
            limit,
        )?;
        Ok(rows.into_iter().map(JobRow::into_snapshot).collect())
    }

    /// One maintenance sweep: release due delayed jobs, reclaim stale
    /// claims, and purge terminal jobs past retention.
    pub fn run_maintenance(&self) -> Result<()> {
        let conn = get_conn(&self.ctx.db)?;
        let now = Utc::now();

        let released = jobs::release_due_jobs(&conn, &now.to_rfc3339())?;
        if released > 0 {
            info!(released, "released delayed jobs back to waiting");
        }

        let stale_cutoff = now
            - chrono::Duration::seconds(self.ctx.config.worker.visibility_timeout_secs as i64);
        let reclaimed = jobs::reclaim_stale_jobs(&conn, &stale_cutoff.to_rfc3339())?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed stale active jobs");
        }

        let retention = &self.ctx.config.retention;
        let completed_before =
            (now - chrono::Duration::hours(retention.completed_hours as i64)).to_rfc3339();
        let failed_before =
            (now - chrono::Duration::days(retention.failed_days as i64)).to_rfc3339();
        let purged = jobs::purge_expired_jobs(
            &conn,
            &completed_before,
            &failed_before,
            retention.completed_max_rows,
        )?;
        if purged > 0 {
            info!(purged, "purged expired terminal jobs");
        }

        Ok(())
    }

    /// Gather filesystem paths that stop being needed once `job` is terminal.
    ///
    /// The input is always included. Artifacts of successful per-format
    /// results are kept even when the job as a whole failed, so recovery can
    /// be format-selective; failed encodes never leave an artifact behind.
    pub fn terminal_cleanup_paths(job: &JobRow) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(&job.input_path)];
        if let Some(results) = job.parsed_results() {
            for r in results.iter().filter(|r| !r.is_success()) {
                if let Some(ref p) = r.output_path {
                    paths.push(PathBuf::from(p));
                }
            }
        }
        paths
    }
}

/// Spawn the periodic maintenance loop. Runs until cancelled.
pub fn spawn_maintenance(
    queue: Arc<JobQueue>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(queue.ctx.config.retention.sweep_interval_secs);
    tokio::spawn(async move {
        info!("maintenance sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    info!("maintenance sweep stopped");
                    break;
                }
            }

            if let Err(e) = queue.run_maintenance() {
                error!("maintenance sweep error: {e}");
            }
        }
    })
}
