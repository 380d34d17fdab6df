//! The document-store contract behind [`TaskStore`](crate::TaskStore).
//!
//! The contract is deliberately narrow: point get/put/delete by primary key,
//! a full scan, and two secondary-index query paths (by status and by date
//! partition). Scans and queries are paged with an opaque cursor and can
//! return either items or only a count. [`SqliteDocumentStore`] is the
//! shipped implementation.

use serde::{Deserialize, Serialize};
use tc_core::{Result, Task, TaskStatus};

use crate::pool::{get_conn, DbPool};
use crate::queries::tasks::{self, Filter, Order};

/// Resume point for a paged scan or query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Index sort key of the last row returned (creation time for index
    /// queries, task id for scans).
    pub sort_key: String,
    pub task_id: String,
}

/// What a scan or query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Items,
    /// Only the number of matching records.
    Count,
}

/// Secondary index to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskIndex {
    Status(TaskStatus),
    /// Date partition, `YYYY-MM-DD`.
    Date(String),
}

/// A query against one secondary index, ordered by creation time.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub index: TaskIndex,
    /// Extra status filter applied server-side.
    pub status_filter: Option<TaskStatus>,
    pub descending: bool,
    pub cursor: Option<PageCursor>,
    pub page_size: usize,
    pub projection: Projection,
}

/// A full-table scan in storage order.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub status_filter: Option<TaskStatus>,
    pub date_filter: Option<String>,
    pub cursor: Option<PageCursor>,
    pub page_size: usize,
    pub projection: Projection,
}

/// One page of a scan or query.
#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    /// Empty for [`Projection::Count`].
    pub items: Vec<Task>,
    /// Number of records in this page (or counted, for count projections).
    pub count: usize,
    pub next_cursor: Option<PageCursor>,
}

/// Storage for task documents.
pub trait DocumentStore: Send + Sync {
    fn get(&self, task_id: &str) -> Result<Option<Task>>;

    /// Write the whole document, replacing any existing record.
    fn put(&self, task: &Task) -> Result<()>;

    /// Returns whether a record was removed.
    fn delete(&self, task_id: &str) -> Result<bool>;

    fn scan(&self, request: &ScanRequest) -> Result<DocumentPage>;

    fn query(&self, request: &IndexQuery) -> Result<DocumentPage>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// [`DocumentStore`] over the `tasks` table.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn page(
        &self,
        filter: Filter<'_>,
        order: Order,
        cursor: Option<&PageCursor>,
        page_size: usize,
        projection: Projection,
    ) -> Result<DocumentPage> {
        let conn = get_conn(&self.pool)?;
        match projection {
            // Counting never needs more than one round trip here.
            Projection::Count => Ok(DocumentPage {
                items: Vec::new(),
                count: tasks::count(&conn, filter, order, cursor)?,
                next_cursor: None,
            }),
            Projection::Items => {
                let (items, next_cursor) =
                    tasks::fetch_page(&conn, filter, order, cursor, page_size.max(1))?;
                Ok(DocumentPage {
                    count: items.len(),
                    items,
                    next_cursor,
                })
            }
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = get_conn(&self.pool)?;
        tasks::get_task(&conn, task_id)
    }

    fn put(&self, task: &Task) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        tasks::upsert_task(&conn, task)
    }

    fn delete(&self, task_id: &str) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        tasks::delete_task(&conn, task_id)
    }

    fn scan(&self, request: &ScanRequest) -> Result<DocumentPage> {
        let status = request.status_filter.map(|s| s.as_str());
        let filter = Filter {
            date_partition: request.date_filter.as_deref(),
            status,
        };
        self.page(
            filter,
            Order::TaskId,
            request.cursor.as_ref(),
            request.page_size,
            request.projection,
        )
    }

    fn query(&self, request: &IndexQuery) -> Result<DocumentPage> {
        let filter = match &request.index {
            TaskIndex::Status(status) => Filter {
                date_partition: None,
                status: Some(status.as_str()),
            },
            TaskIndex::Date(date) => Filter {
                date_partition: Some(date.as_str()),
                status: request.status_filter.map(|s| s.as_str()),
            },
        };
        let order = if request.descending {
            Order::CreatedDesc
        } else {
            Order::CreatedAsc
        };
        self.page(
            filter,
            order,
            request.cursor.as_ref(),
            request.page_size,
            request.projection,
        )
    }
}
