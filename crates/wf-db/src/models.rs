//! Rust structs mapping to database tables.
//!
//! [`JobRow`] implements `from_row` for constructing itself from a
//! `rusqlite::Row` and converts into the public [`JobSnapshot`] view.

use uuid::Uuid;
use wf_core::{JobId, JobSnapshot, JobState, OutputSpec, TranscodeResult};

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

/// One row of the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: JobId,
    pub owner_id: String,
    pub subject_id: String,
    pub input_path: String,
    /// JSON array of [`OutputSpec`].
    pub output_specs: String,
    pub state: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: f64,
    /// JSON array of [`TranscodeResult`], populated on terminal states.
    pub results: Option<String>,
    pub failure_reason: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub delayed_until: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobRow {
    /// Build from a row selected as all columns in table order.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            owner_id: row.get(1)?,
            subject_id: row.get(2)?,
            input_path: row.get(3)?,
            output_specs: row.get(4)?,
            state: row.get(5)?,
            attempts: row.get::<_, i64>(6).unwrap_or(0) as u32,
            max_attempts: row.get::<_, i64>(7).unwrap_or(3) as u32,
            progress: row.get::<_, f64>(8).unwrap_or(0.0),
            results: row.get(9)?,
            failure_reason: row.get(10)?,
            locked_by: row.get(11)?,
            locked_at: row.get(12)?,
            delayed_until: row.get(13)?,
            created_at: row.get(14)?,
            started_at: row.get(15)?,
            finished_at: row.get(16)?,
        })
    }

    /// Deserialize the stored output specs.
    pub fn parsed_specs(&self) -> Vec<OutputSpec> {
        serde_json::from_str(&self.output_specs).unwrap_or_default()
    }

    /// Deserialize the stored per-format results, if any.
    pub fn parsed_results(&self) -> Option<Vec<TranscodeResult>> {
        self.results
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Convert into the public read-only snapshot.
    ///
    /// `delayed` is reported as `waiting` since it is only an internal
    /// backoff holding state.
    pub fn into_snapshot(self) -> JobSnapshot {
        let state = self
            .state
            .parse::<JobState>()
            .unwrap_or(JobState::Waiting);
        let observed = if state == JobState::Delayed {
            JobState::Waiting
        } else {
            state
        };

        let specs = self.parsed_specs();
        let results = self.parsed_results();

        JobSnapshot {
            id: self.id,
            owner_id: self.owner_id,
            subject_id: self.subject_id,
            input_path: Some(self.input_path),
            output_specs: specs,
            state: observed,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            progress_percent: self.progress,
            results,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
