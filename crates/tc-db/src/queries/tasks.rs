//! Task document queries.
//!
//! Tasks are stored as JSON documents keyed by `task_id`, with the index
//! columns copied out on every write. Paging is keyset-based: a cursor holds
//! the last row's sort key and id, and the next page starts strictly after it.

use chrono::SecondsFormat;
use rusqlite::types::ToSql;
use rusqlite::Connection;
use tc_core::{Error, Result, Task};

use crate::document::PageCursor;

/// Row order for a page of tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Primary-key order; unrelated to creation time.
    TaskId,
    CreatedAsc,
    CreatedDesc,
}

/// Column filters applied inside the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct Filter<'a> {
    pub date_partition: Option<&'a str>,
    pub status: Option<&'a str>,
}

/// The `created_at` index column: fixed-width UTC so text order is time order.
pub fn created_key(task: &Task) -> String {
    task.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(document: String) -> rusqlite::Result<Task> {
    serde_json::from_str(&document).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Get a task by id.
pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let result = conn.query_row(
        "SELECT document FROM tasks WHERE task_id = ?1",
        [task_id],
        |row| decode(row.get(0)?),
    );
    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Insert or replace the whole task document.
pub fn upsert_task(conn: &Connection, task: &Task) -> Result<()> {
    let document = serde_json::to_string(task)
        .map_err(|e| Error::Internal(format!("failed to encode task: {e}")))?;

    conn.execute(
        "INSERT INTO tasks (task_id, date_partition, status, created_at, document)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(task_id) DO UPDATE SET
             date_partition = excluded.date_partition,
             status = excluded.status,
             created_at = excluded.created_at,
             document = excluded.document",
        rusqlite::params![
            task.task_id,
            task.date_partition,
            task.status.as_str(),
            created_key(task),
            document
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Delete a task. Returns whether a row was removed.
pub fn delete_task(conn: &Connection, task_id: &str) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM tasks WHERE task_id = ?1", [task_id])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Build the WHERE clause shared by page and count queries.
fn where_clause(
    filter: Filter<'_>,
    order: Order,
    after: Option<&PageCursor>,
) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(date) = filter.date_partition {
        params.push(Box::new(date.to_string()));
        clauses.push(format!("date_partition = ?{}", params.len()));
    }
    if let Some(status) = filter.status {
        params.push(Box::new(status.to_string()));
        clauses.push(format!("status = ?{}", params.len()));
    }
    if let Some(cursor) = after {
        match order {
            Order::TaskId => {
                params.push(Box::new(cursor.task_id.clone()));
                clauses.push(format!("task_id > ?{}", params.len()));
            }
            Order::CreatedAsc | Order::CreatedDesc => {
                let op = if order == Order::CreatedAsc { ">" } else { "<" };
                params.push(Box::new(cursor.sort_key.clone()));
                params.push(Box::new(cursor.task_id.clone()));
                clauses.push(format!(
                    "(created_at, task_id) {op} (?{}, ?{})",
                    params.len() - 1,
                    params.len()
                ));
            }
        }
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, params)
}

fn order_clause(order: Order) -> &'static str {
    match order {
        Order::TaskId => " ORDER BY task_id ASC",
        Order::CreatedAsc => " ORDER BY created_at ASC, task_id ASC",
        Order::CreatedDesc => " ORDER BY created_at DESC, task_id DESC",
    }
}

/// Fetch up to `limit` tasks after `after` in the given order.
///
/// Returns the rows and, when more rows remain, the cursor to resume from.
pub fn fetch_page(
    conn: &Connection,
    filter: Filter<'_>,
    order: Order,
    after: Option<&PageCursor>,
    limit: usize,
) -> Result<(Vec<Task>, Option<PageCursor>)> {
    let (where_sql, mut params) = where_clause(filter, order, after);
    // One extra row tells us whether another page exists.
    params.push(Box::new((limit + 1) as i64));
    let q = format!(
        "SELECT task_id, created_at, document FROM tasks{where_sql}{} LIMIT ?{}",
        order_clause(order),
        params.len()
    );

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut rows = stmt
        .query_map(params_refs.as_slice(), |row| {
            let task_id: String = row.get(0)?;
            let created: String = row.get(1)?;
            let task = decode(row.get(2)?)?;
            Ok((task_id, created, task))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let next = if rows.len() > limit {
        rows.truncate(limit);
        rows.last().map(|(task_id, created, _)| PageCursor {
            sort_key: match order {
                Order::TaskId => task_id.clone(),
                _ => created.clone(),
            },
            task_id: task_id.clone(),
        })
    } else {
        None
    };

    Ok((rows.into_iter().map(|(_, _, task)| task).collect(), next))
}

/// Count tasks matching `filter` after `after`.
pub fn count(
    conn: &Connection,
    filter: Filter<'_>,
    order: Order,
    after: Option<&PageCursor>,
) -> Result<usize> {
    let (where_sql, params) = where_clause(filter, order, after);
    let q = format!("SELECT COUNT(*) FROM tasks{where_sql}");
    let params_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let n: i64 = conn
        .query_row(&q, params_refs.as_slice(), |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n as usize)
}
