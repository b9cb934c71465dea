//! Schema upgrades for the SQLite store.
//!
//! Applied steps are recorded in `schema_history`; each pending step runs in
//! its own transaction together with its history row.

use tokio_rusqlite::{Connection, params};

use crate::Error;

/// A numbered schema step.
struct Step {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ascending by version.
const STEPS: &[Step] = &[
    Step { version: 1, name: "cache", sql: include_str!("../../../migrations/001_cache.sql") },
    Step { version: 2, name: "visits", sql: include_str!("../../../migrations/002_visits.sql") },
    Step { version: 3, name: "queue", sql: include_str!("../../../migrations/003_queue.sql") },
];

/// Bring the schema of `conn` up to the newest step.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_history (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;
        let applied: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_history", [], |row| row.get(0))?;

        for step in STEPS.iter().filter(|step| step.version > applied) {
            let tx = conn.transaction()?;
            tx.execute_batch(step.sql)
                .map_err(|e| Error::MigrationFailed(format!("{} ({}): {e}", step.version, step.name)))?;
            tx.execute(
                "INSERT INTO schema_history (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![step.version, step.name, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version = step.version, name = step.name, "schema step applied");
        }
        Ok(())
    })
    .await
    .map_err(Error::from)
}
