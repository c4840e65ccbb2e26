//! Job queue operations.
//!
//! All state transitions live here as single atomic statements so that the
//! queue layer above never races concurrent workers: a claim is one
//! `UPDATE ... WHERE id = (SELECT ...) RETURNING`, and every terminal
//! transition is guarded on the current state.

use chrono::Utc;
use rusqlite::Connection;
use wf_core::{Error, JobId, Result};

use crate::models::JobRow;

const COLS: &str = "id, owner_id, subject_id, input_path, output_specs, state,
    attempts, max_attempts, progress, results, failure_reason,
    locked_by, locked_at, delayed_until, created_at, started_at, finished_at";

/// Create a new job in `waiting` state.
pub fn create_job(
    conn: &Connection,
    owner_id: &str,
    subject_id: &str,
    input_path: &str,
    output_specs_json: &str,
    max_attempts: u32,
) -> Result<JobRow> {
    let id = JobId::new();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO jobs (id, owner_id, subject_id, input_path, output_specs,
            state, max_attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'waiting', ?6, ?7)",
        rusqlite::params![
            id.to_string(),
            owner_id,
            subject_id,
            input_path,
            output_specs_json,
            max_attempts,
            &now
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(JobRow {
        id,
        owner_id: owner_id.to_string(),
        subject_id: subject_id.to_string(),
        input_path: input_path.to_string(),
        output_specs: output_specs_json.to_string(),
        state: "waiting".to_string(),
        attempts: 0,
        max_attempts,
        progress: 0.0,
        results: None,
        failure_reason: None,
        locked_by: None,
        locked_at: None,
        delayed_until: None,
        created_at: now,
        started_at: None,
        finished_at: None,
    })
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<JobRow>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], JobRow::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List jobs with optional owner/state filters and pagination.
///
/// Filtering on `waiting` also matches `delayed` rows, since observers treat
/// the backoff holding state as a variant of waiting.
pub fn list_jobs(
    conn: &Connection,
    owner_id: Option<&str>,
    state: Option<&str>,
    offset: i64,
    limit: i64,
) -> Result<Vec<JobRow>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(owner) = owner_id {
        params_vec.push(Box::new(owner.to_string()));
        clauses.push(format!("owner_id = ?{}", params_vec.len()));
    }
    if let Some(s) = state {
        if s == "waiting" {
            clauses.push("state IN ('waiting', 'delayed')".to_string());
        } else {
            params_vec.push(Box::new(s.to_string()));
            clauses.push(format!("state = ?{}", params_vec.len()));
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    params_vec.push(Box::new(limit));
    let limit_idx = params_vec.len();
    params_vec.push(Box::new(offset));
    let offset_idx = params_vec.len();

    let q = format!(
        "SELECT {COLS} FROM jobs {where_sql}
         ORDER BY created_at DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
    );

    let mut stmt = conn
        .prepare(&q)
        .map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), JobRow::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Atomically claim the next `waiting` job for `worker`.
///
/// Sets `state='active'`, records the claim lock and `started_at`, and
/// increments `attempts`. The sub-select picks the oldest waiting job so
/// claims are approximately FIFO. SQLite serializes the UPDATE, so no two
/// concurrent callers can claim the same row.
pub fn dequeue_next(conn: &Connection, worker: &str) -> Result<Option<JobRow>> {
    let now = Utc::now().to_rfc3339();

    let q = format!(
        "UPDATE jobs SET state='active', locked_by=?1, locked_at=?2, started_at=?2,
             attempts=attempts+1, progress=0.0
         WHERE id = (
             SELECT id FROM jobs WHERE state='waiting'
             ORDER BY created_at ASC LIMIT 1
         )
         RETURNING {COLS}"
    );

    let result = conn.query_row(&q, rusqlite::params![worker, &now], JobRow::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Update progress for an `active` job; no-op in any other state.
///
/// Progress is monotone within an attempt (`MAX` against the stored value)
/// and the claim lock timestamp is refreshed so a progressing job is never
/// reclaimed as stale.
pub fn update_progress(conn: &Connection, id: JobId, percent: f64) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let clamped = percent.clamp(0.0, 100.0);
    let n = conn
        .execute(
            "UPDATE jobs SET progress = MAX(progress, ?1), locked_at = ?2
             WHERE id = ?3 AND state = 'active'",
            rusqlite::params![clamped, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Transition an `active` job to `completed` with its result payload.
pub fn complete_job(conn: &Connection, id: JobId, results_json: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET state='completed', progress=100.0, results=?1,
                 finished_at=?2, locked_by=NULL, locked_at=NULL
             WHERE id=?3 AND state='active'",
            rusqlite::params![results_json, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Transition an `active` job to `delayed` until `delayed_until` (RFC 3339).
///
/// Any per-format results from the failed attempt are stored so partial
/// successes remain queryable while the job waits out its backoff.
pub fn delay_job(
    conn: &Connection,
    id: JobId,
    delayed_until: &str,
    results_json: Option<&str>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET state='delayed', delayed_until=?1,
                 results=COALESCE(?2, results), locked_by=NULL, locked_at=NULL
             WHERE id=?3 AND state='active'",
            rusqlite::params![delayed_until, results_json, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Transition an `active` job to terminal `failed`.
pub fn fail_job(
    conn: &Connection,
    id: JobId,
    reason: &str,
    results_json: Option<&str>,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET state='failed', failure_reason=?1,
                 results=COALESCE(?2, results), finished_at=?3,
                 locked_by=NULL, locked_at=NULL
             WHERE id=?4 AND state='active'",
            rusqlite::params![reason, results_json, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Release `delayed` jobs whose backoff has elapsed back to `waiting`.
///
/// `created_at` is untouched, so a released job competes with fresh jobs in
/// its original FIFO position.
pub fn release_due_jobs(conn: &Connection, now: &str) -> Result<usize> {
    let n = conn
        .execute(
            "UPDATE jobs SET state='waiting', delayed_until=NULL
             WHERE state='delayed' AND delayed_until <= ?1",
            [now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Return `active` jobs whose claim lock predates `cutoff` to `waiting`.
///
/// Covers executors that crashed mid-job; the attempt already counted at
/// claim time is not refunded.
pub fn reclaim_stale_jobs(conn: &Connection, cutoff: &str) -> Result<usize> {
    let n = conn
        .execute(
            "UPDATE jobs SET state='waiting', locked_by=NULL, locked_at=NULL
             WHERE state='active' AND locked_at < ?1",
            [cutoff],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Purge terminal jobs past their retention windows.
///
/// Completed rows older than `completed_before` and failed rows older than
/// `failed_before` are deleted; if `completed_max_rows` is set, the oldest
/// completed rows beyond the cap are deleted as well.
pub fn purge_expired_jobs(
    conn: &Connection,
    completed_before: &str,
    failed_before: &str,
    completed_max_rows: Option<u64>,
) -> Result<usize> {
    let mut total = conn
        .execute(
            "DELETE FROM jobs WHERE state='completed' AND finished_at < ?1",
            [completed_before],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    total += conn
        .execute(
            "DELETE FROM jobs WHERE state='failed' AND finished_at < ?1",
            [failed_before],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if let Some(cap) = completed_max_rows {
        total += conn
            .execute(
                "DELETE FROM jobs WHERE state='completed' AND id NOT IN (
                     SELECT id FROM jobs WHERE state='completed'
                     ORDER BY finished_at DESC LIMIT ?1
                 )",
                [cap as i64],
            )
            .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(total)
}

/// Count jobs currently in the given state.
pub fn count_in_state(conn: &Connection, state: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE state = ?1",
        [state],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}
