//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use tc_core::{Error, Result};

/// V1: task documents with their secondary index columns.
///
/// The whole task lives in `document` as JSON; `date_partition`, `status`
/// and `created_at` are copied out so the two indexed access paths can
/// order and filter without decoding documents.
const V1_TASKS: &str = r#"
CREATE TABLE tasks (
    task_id        TEXT PRIMARY KEY,
    date_partition TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    document       TEXT NOT NULL
);

CREATE INDEX idx_tasks_date ON tasks(date_partition, created_at, task_id);
CREATE INDEX idx_tasks_status ON tasks(status, created_at, task_id);
"#;

/// V2: broker message table with lease bookkeeping.
const V2_QUEUE: &str = r#"
CREATE TABLE queue_messages (
    message_id     TEXT PRIMARY KEY,
    body           TEXT NOT NULL,
    attributes     TEXT NOT NULL DEFAULT '{}',
    task_id        TEXT,
    receipt_handle TEXT,
    visible_at     INTEGER NOT NULL,
    receive_count  INTEGER NOT NULL DEFAULT 0,
    sent_at        INTEGER NOT NULL
);

CREATE INDEX idx_queue_visible ON queue_messages(visible_at, sent_at);
CREATE INDEX idx_queue_task ON queue_messages(task_id);
CREATE UNIQUE INDEX idx_queue_receipt ON queue_messages(receipt_handle);
"#;

/// Ordered list of all migrations.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_TASKS), (2, V2_QUEUE)];

/// Run all pending migrations against `conn`.
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
        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
