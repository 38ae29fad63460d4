//! Schema setup for the robot tables.
//!
//! The schema version lives in SQLite's `user_version` header field: step
//! `n` of [`SCHEMA`] has been applied once `user_version >= n + 1`. Each
//! step and its version bump commit together.

use rusqlite::Connection;
use thiserror::Error;

/// Schema steps in apply order. Only ever append.
const SCHEMA: &[(&str, &str)] = &[
    ("robot_keys", include_str!("migrations/001_robot_keys.sql")),
    ("robots", include_str!("migrations/002_robots.sql")),
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("schema step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        source: rusqlite::Error,
    },

    #[error("failed to read schema version: {0}")]
    Version(rusqlite::Error),

    /// The database was written by a build with more schema steps.
    #[error("database schema version {found} is newer than this build ({known})")]
    TooNew { found: usize, known: usize },
}

/// Brings the schema up to date, returning how many steps were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_steps(conn, SCHEMA)
}

fn schema_version(conn: &Connection) -> Result<usize, MigrationError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(MigrationError::Version)?;
    Ok(usize::try_from(version).unwrap_or(0))
}

fn apply_steps(conn: &Connection, steps: &[(&'static str, &str)]) -> Result<usize, MigrationError> {
    let current = schema_version(conn)?;
    if current > steps.len() {
        return Err(MigrationError::TooNew {
            found: current,
            known: steps.len(),
        });
    }

    for (index, &(step, sql)) in steps.iter().enumerate().skip(current) {
        let fail = |source| MigrationError::Step { step, source };
        tracing::info!(step, version = index + 1, "applying schema step");

        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(sql).map_err(fail)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", index + 1))
            .map_err(fail)?;
        tx.commit().map_err(fail)?;
    }

    Ok(steps.len() - current)
}
