//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order. A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use wf_core::{Error, Result};

/// V1: initial schema -- the jobs table and its indexes.
const V1_INITIAL: &str = r#"
-- Transcode jobs
CREATE TABLE jobs (
    id             TEXT PRIMARY KEY,
    owner_id       TEXT NOT NULL,
    subject_id     TEXT NOT NULL,
    input_path     TEXT NOT NULL,
    output_specs   TEXT NOT NULL,
    state          TEXT NOT NULL DEFAULT 'waiting',
    attempts       INTEGER NOT NULL DEFAULT 0,
    max_attempts   INTEGER NOT NULL DEFAULT 3,
    progress       REAL NOT NULL DEFAULT 0.0,
    results        TEXT,
    failure_reason TEXT,
    locked_by      TEXT,
    locked_at      TEXT,
    delayed_until  TEXT,
    created_at     TEXT NOT NULL,
    started_at     TEXT,
    finished_at    TEXT
);

CREATE INDEX idx_jobs_state      ON jobs(state);
CREATE INDEX idx_jobs_owner      ON jobs(owner_id);
CREATE INDEX idx_jobs_created_at ON jobs(created_at);
"#;

/// V2: index for the maintenance sweep over delayed jobs.
const V2_DELAYED_INDEX: &str = r#"
CREATE INDEX idx_jobs_delayed_until ON jobs(delayed_until) WHERE state = 'delayed';
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL), (2, V2_DELAYED_INDEX)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}
