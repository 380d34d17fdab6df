//! Broker message table queries.
//!
//! A message is visible when `visible_at <= now`. Receiving claims visible
//! rows in one statement, pushing `visible_at` out by the lease and issuing a
//! fresh receipt handle, so a stale handle from an expired lease can no
//! longer delete the message. Times are Unix milliseconds.

use std::collections::HashMap;

use rusqlite::Connection;
use tc_core::{Error, Result};

/// A row claimed by [`claim_visible`].
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub message_id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub receipt_handle: String,
    pub receive_count: u32,
    pub sent_at: i64,
}

/// Insert a new, immediately visible message.
pub fn insert_message(
    conn: &Connection,
    message_id: &str,
    body: &str,
    attributes: &HashMap<String, String>,
    task_id: Option<&str>,
    now_ms: i64,
) -> Result<()> {
    let attrs = serde_json::to_string(attributes)
        .map_err(|e| Error::Internal(format!("failed to encode attributes: {e}")))?;
    conn.execute(
        "INSERT INTO queue_messages (message_id, body, attributes, task_id, visible_at, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        rusqlite::params![message_id, body, attrs, task_id, now_ms],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Atomically claim up to `max` visible messages, oldest first.
pub fn claim_visible(
    conn: &Connection,
    now_ms: i64,
    lease_ms: i64,
    max: usize,
) -> Result<Vec<ClaimedMessage>> {
    // SQLite RETURNING is supported since 3.35.
    let mut stmt = conn
        .prepare(
            "UPDATE queue_messages
             SET receipt_handle = lower(hex(randomblob(16))),
                 visible_at = ?1 + ?2,
                 receive_count = receive_count + 1
             WHERE message_id IN (
                 SELECT message_id FROM queue_messages
                 WHERE visible_at <= ?1
                 ORDER BY sent_at ASC, rowid ASC
                 LIMIT ?3
             )
             RETURNING message_id, body, attributes, receipt_handle, receive_count, sent_at",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let mut claimed = stmt
        .query_map(rusqlite::params![now_ms, lease_ms, max as i64], |row| {
            let attrs: String = row.get(2)?;
            Ok(ClaimedMessage {
                message_id: row.get(0)?,
                body: row.get(1)?,
                attributes: serde_json::from_str(&attrs).unwrap_or_default(),
                receipt_handle: row.get(3)?,
                receive_count: row.get(4)?,
                sent_at: row.get(5)?,
            })
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    // RETURNING order is unspecified.
    claimed.sort_by_key(|m| m.sent_at);
    Ok(claimed)
}

/// Delete the message currently leased under `receipt_handle`.
pub fn delete_by_receipt(conn: &Connection, receipt_handle: &str) -> Result<bool> {
    let n = conn
        .execute(
            "DELETE FROM queue_messages WHERE receipt_handle = ?1",
            [receipt_handle],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Delete every message. Returns the number removed.
pub fn purge(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM queue_messages", [])
        .map_err(|e| Error::database(e.to_string()))
}

/// Count `(visible, in_flight)` messages at `now_ms`.
pub fn depth(conn: &Connection, now_ms: i64) -> Result<(usize, usize)> {
    conn.query_row(
        "SELECT
             COALESCE(SUM(CASE WHEN visible_at <= ?1 THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN visible_at > ?1 THEN 1 ELSE 0 END), 0)
         FROM queue_messages",
        [now_ms],
        |row| Ok((row.get::<_, i64>(0)? as usize, row.get::<_, i64>(1)? as usize)),
    )
    .map_err(|e| Error::database(e.to_string()))
}
