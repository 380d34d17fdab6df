//! Authoritative task records and their state transitions.
//!
//! Every mutation is a read-modify-write of the whole document through the
//! [`DocumentStore`]. There is no version check, so two writers racing on the
//! same task (e.g. a duplicate queue delivery) resolve as last writer wins.
//!
//! Listing picks one of three access strategies from the filters present and
//! uses the same strategy for the count and the fetch.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tc_core::config::TaskConfig;
use tc_core::{
    Error, ErrorDetail, ListFilter, ProgressState, Result, Task, TaskPage, TaskStatus,
};

use crate::document::{
    DocumentPage, DocumentStore, IndexQuery, PageCursor, Projection, ScanRequest, TaskIndex,
};

/// Records read per round trip when walking an index or scan.
const DEFAULT_PAGE_SIZE: usize = 100;

/// Knobs that come from configuration.
#[derive(Debug, Clone)]
pub struct TaskDefaults {
    pub max_retries: u32,
    pub default_limit: usize,
    pub max_limit: usize,
    pub page_size: usize,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for TaskDefaults {
    fn from(config: &TaskConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            default_limit: config.default_list_limit.max(1),
            max_limit: config.max_list_limit.max(1),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// How a list call reaches its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStrategy {
    /// Date-partition index, newest first, optional status filter.
    ByDate,
    /// Status index, newest first.
    ByStatus,
    /// Full scan; storage order is arbitrary so results are sorted here.
    Scan,
}

impl ListStrategy {
    pub fn for_filter(filter: &ListFilter) -> Self {
        if filter.date.is_some() {
            ListStrategy::ByDate
        } else if filter.status.is_some() {
            ListStrategy::ByStatus
        } else {
            ListStrategy::Scan
        }
    }
}

/// Task lifecycle operations over a [`DocumentStore`].
#[derive(Clone)]
pub struct TaskStore {
    store: Arc<dyn DocumentStore>,
    defaults: TaskDefaults,
}

impl TaskStore {
    pub fn new(store: Arc<dyn DocumentStore>, defaults: TaskDefaults) -> Self {
        Self { store, defaults }
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    /// Create a `pending` task with a generated id.
    pub fn create(
        &self,
        input_bucket: &str,
        input_key: &str,
        output_bucket: &str,
        transcode_types: Vec<String>,
    ) -> Result<Task> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let task = Task::new(
            task_id,
            input_bucket,
            input_key,
            output_bucket,
            transcode_types,
            self.defaults.max_retries,
        );
        self.store.put(&task)?;
        tracing::info!(task_id = %task.task_id, key = %input_key, "Created task");
        Ok(task)
    }

    /// Create a task under a caller-chosen id.
    ///
    /// If a record with that id already exists it is returned unchanged, so
    /// repeated deliveries of the same message converge on one record.
    pub fn create_with_id(
        &self,
        task_id: &str,
        input_bucket: &str,
        input_key: &str,
        output_bucket: &str,
        transcode_types: Vec<String>,
    ) -> Result<Task> {
        if let Some(existing) = self.store.get(task_id)? {
            return Ok(existing);
        }
        let task = Task::new(
            task_id,
            input_bucket,
            input_key,
            output_bucket,
            transcode_types,
            self.defaults.max_retries,
        );
        self.store.put(&task)?;
        tracing::info!(task_id = %task_id, key = %input_key, "Created task from message");
        Ok(task)
    }

    /// Fetch a task; `NotFound` when absent.
    pub fn get(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(task_id)?
            .ok_or_else(|| Error::not_found("task", task_id))
    }

    /// True when the task is no longer `processing`, i.e. someone aborted it
    /// (or otherwise moved it) while a worker was driving it.
    pub fn is_aborted(&self, task_id: &str) -> Result<bool> {
        Ok(self.get(task_id)?.status != TaskStatus::Processing)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    fn mutate(&self, task_id: &str, f: impl FnOnce(&mut Task) -> Result<()>) -> Result<Task> {
        let mut task = self.get(task_id)?;
        f(&mut task)?;
        task.updated_at = Utc::now();
        self.store.put(&task)?;
        Ok(task)
    }

    /// Set the status, stamping started/completed times and a non-empty message.
    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<&str>,
    ) -> Result<Task> {
        let task = self.mutate(task_id, |task| {
            task.apply_status(status, message);
            Ok(())
        })?;
        tracing::debug!(task_id = %task_id, status = %status, "Task status updated");
        Ok(task)
    }

    pub fn update_progress(
        &self,
        task_id: &str,
        transcode_type: &str,
        state: ProgressState,
    ) -> Result<Task> {
        self.mutate(task_id, |task| {
            task.progress.insert(transcode_type.to_string(), state);
            Ok(())
        })
    }

    /// Move a task to `processing` for a new run. Entries left unfinished
    /// by an earlier, interrupted run go back to `pending`.
    pub fn begin_run(&self, task_id: &str) -> Result<Task> {
        let task = self.mutate(task_id, |task| {
            task.apply_status(TaskStatus::Processing, None);
            for state in task.progress.values_mut() {
                if *state != ProgressState::Completed {
                    *state = ProgressState::Pending;
                }
            }
            Ok(())
        })?;
        tracing::debug!(task_id = %task_id, "Task run started");
        Ok(task)
    }

    /// Mark a type `processing` for a run that is about to encode it.
    ///
    /// Nothing is written, and `false` is returned, when the task has left
    /// `processing` or the type was already failed by an abort that has
    /// not yet moved the task status.
    pub fn begin_type(&self, task_id: &str, transcode_type: &str) -> Result<bool> {
        let mut task = self.get(task_id)?;
        if task.status != TaskStatus::Processing
            || task.progress.get(transcode_type) == Some(&ProgressState::Failed)
        {
            return Ok(false);
        }
        task.progress
            .insert(transcode_type.to_string(), ProgressState::Processing);
        task.updated_at = Utc::now();
        self.store.put(&task)?;
        Ok(true)
    }

    /// Record the output object key for a successful type.
    pub fn add_output(&self, task_id: &str, transcode_type: &str, key: &str) -> Result<Task> {
        self.mutate(task_id, |task| {
            task.output_files
                .insert(transcode_type.to_string(), key.to_string());
            Ok(())
        })
    }

    /// Append an error record, truncating its command and output.
    pub fn add_error_detail(&self, task_id: &str, detail: ErrorDetail) -> Result<Task> {
        self.mutate(task_id, |task| {
            task.error_details.push(detail.truncated());
            Ok(())
        })
    }

    /// Reset a task for another run. Illegal while it is `processing`.
    pub fn retry(&self, task_id: &str) -> Result<Task> {
        let task = self.mutate(task_id, |task| {
            if task.status == TaskStatus::Processing {
                return Err(Error::invalid_state(format!(
                    "task {task_id} is processing and cannot be retried"
                )));
            }
            task.reset_for_retry();
            Ok(())
        })?;
        tracing::info!(task_id = %task_id, retry_count = task.retry_count, "Task reset for retry");
        Ok(task)
    }

    /// Flip every per-type entry that has not completed to `failed`.
    pub fn mark_incomplete_failed(&self, task_id: &str) -> Result<Task> {
        self.mutate(task_id, |task| {
            task.mark_incomplete_failed();
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// Clamp a requested page size: `0` means the default, anything above
    /// the maximum is cut to it.
    pub fn clamp_limit(&self, limit: usize) -> usize {
        if limit == 0 {
            self.defaults.default_limit.min(self.defaults.max_limit)
        } else {
            limit.min(self.defaults.max_limit)
        }
    }

    /// List tasks matching `filter`, newest first.
    pub fn list(&self, filter: &ListFilter, limit: usize, offset: usize) -> Result<TaskPage> {
        let limit = self.clamp_limit(limit);
        let strategy = ListStrategy::for_filter(filter);
        let total = self.count(strategy, filter)?;

        if offset >= total {
            return Ok(TaskPage {
                tasks: Vec::new(),
                total,
                limit,
                offset,
            });
        }

        let tasks = match strategy {
            ListStrategy::ByDate | ListStrategy::ByStatus => {
                self.collect_indexed(strategy, filter, offset, limit)?
            }
            ListStrategy::Scan => self.collect_scan(filter, offset, limit)?,
        };

        tracing::debug!(?strategy, total, returned = tasks.len(), "Listed tasks");
        Ok(TaskPage {
            tasks,
            total,
            limit,
            offset,
        })
    }

    fn index_query(
        &self,
        strategy: ListStrategy,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
        projection: Projection,
    ) -> IndexQuery {
        let (index, status_filter) = match (strategy, &filter.date) {
            (ListStrategy::ByDate, Some(date)) => (TaskIndex::Date(date.clone()), filter.status),
            _ => (
                TaskIndex::Status(filter.status.unwrap_or(TaskStatus::Pending)),
                None,
            ),
        };
        IndexQuery {
            index,
            status_filter,
            descending: true,
            cursor,
            page_size: self.defaults.page_size,
            projection,
        }
    }

    fn scan_request(
        &self,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
        projection: Projection,
    ) -> ScanRequest {
        ScanRequest {
            status_filter: filter.status,
            date_filter: filter.date.clone(),
            cursor,
            page_size: self.defaults.page_size,
            projection,
        }
    }

    fn fetch(
        &self,
        strategy: ListStrategy,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
        projection: Projection,
    ) -> Result<DocumentPage> {
        match strategy {
            ListStrategy::Scan => self
                .store
                .scan(&self.scan_request(filter, cursor, projection)),
            _ => self
                .store
                .query(&self.index_query(strategy, filter, cursor, projection)),
        }
    }

    /// Total matching records via a count-only projection.
    fn count(&self, strategy: ListStrategy, filter: &ListFilter) -> Result<usize> {
        let mut total = 0;
        let mut cursor = None;
        loop {
            let page = self.fetch(strategy, filter, cursor, Projection::Count)?;
            total += page.count;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(total),
            }
        }
    }

    /// Walk an index newest first, skipping `offset` then collecting `limit`.
    fn collect_indexed(
        &self,
        strategy: ListStrategy,
        filter: &ListFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let mut skipped = 0;
        let mut out = Vec::with_capacity(limit);
        let mut cursor = None;

        loop {
            let page = self.fetch(strategy, filter, cursor, Projection::Items)?;
            for task in page.items {
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                out.push(task);
                if out.len() == limit {
                    return Ok(out);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(out),
            }
        }
    }

    /// Scan everything, keeping only the newest `offset + limit` records in a
    /// bounded heap, then sort descending and slice out the page.
    fn collect_scan(&self, filter: &ListFilter, offset: usize, limit: usize) -> Result<Vec<Task>> {
        let keep = offset + limit;
        let mut heap: BinaryHeap<Reverse<Newest>> = BinaryHeap::with_capacity(keep + 1);
        let mut cursor = None;

        loop {
            let page = self.fetch(ListStrategy::Scan, filter, cursor, Projection::Items)?;
            for task in page.items {
                heap.push(Reverse(Newest(task)));
                if heap.len() > keep {
                    heap.pop();
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut buffered: Vec<Task> = heap.into_iter().map(|Reverse(Newest(t))| t).collect();
        buffered.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        Ok(buffered.into_iter().skip(offset).take(limit).collect())
    }
}

fn sort_key(task: &Task) -> (DateTime<Utc>, &str) {
    (task.created_at, task.task_id.as_str())
}

/// Orders tasks by creation time (ties by id) so the heap can evict the oldest.
struct Newest(Task);

impl PartialEq for Newest {
    fn eq(&self, other: &Self) -> bool {
        sort_key(&self.0) == sort_key(&other.0)
    }
}

impl Eq for Newest {}

impl PartialOrd for Newest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Newest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        sort_key(&self.0).cmp(&sort_key(&other.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SqliteDocumentStore;
    use crate::pool::init_memory_pool;
    use chrono::{Duration, TimeZone};
    use tc_core::ErrorStage;

    fn store() -> TaskStore {
        let docs = SqliteDocumentStore::new(init_memory_pool().unwrap());
        TaskStore::new(Arc::new(docs), TaskDefaults::default())
    }

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Insert a task with a fixed creation time and status.
    fn seed(store: &TaskStore, id: &str, date: &str, minute: i64, status: TaskStatus) {
        let day: chrono::NaiveDate = date.parse().unwrap();
        let mut task = Task::new(id, "in", "a.mp4", "", types(&["thumbnail"]), 3);
        task.created_at = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
            + Duration::minutes(minute);
        task.date_partition = date.to_string();
        task.status = status;
        store.store.put(&task).unwrap();
    }

    fn ids(page: &TaskPage) -> Vec<&str> {
        page.tasks.iter().map(|t| t.task_id.as_str()).collect()
    }

    #[test]
    fn create_initialises_progress_for_every_type() {
        let store = store();
        let task = store
            .create("in", "clip.mp4", "out", types(&["mp4_standard", "thumbnail"]))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress.len(), 2);
        assert!(task.progress.values().all(|s| *s == ProgressState::Pending));
        assert_eq!(task.max_retries, 3);
        assert_eq!(store.get(&task.task_id).unwrap(), task);
    }

    #[test]
    fn get_is_stable_without_mutation() {
        let store = store();
        let task = store.create("in", "a.mp4", "", types(&["thumbnail"])).unwrap();
        let a = store.get(&task.task_id).unwrap();
        let b = store.get(&task.task_id).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let err = store().get("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_with_id_returns_existing() {
        let store = store();
        let first = store
            .create_with_id("s3-1", "in", "a.mp4", "", types(&["thumbnail"]))
            .unwrap();
        store
            .update_status("s3-1", TaskStatus::Processing, None)
            .unwrap();
        let again = store
            .create_with_id("s3-1", "other", "b.mp4", "", types(&["mp4_smooth"]))
            .unwrap();
        assert_eq!(again.input_key, first.input_key);
        assert_eq!(again.status, TaskStatus::Processing);
    }

    #[test]
    fn update_status_stamps_times() {
        let store = store();
        let task = store.create("in", "a.mp4", "", types(&["thumbnail"])).unwrap();
        let processing = store
            .update_status(&task.task_id, TaskStatus::Processing, None)
            .unwrap();
        assert!(processing.started_at.is_some());
        assert!(processing.completed_at.is_none());
        assert!(processing.updated_at >= task.updated_at);

        let failed = store
            .update_status(&task.task_id, TaskStatus::Failed, Some("download failed"))
            .unwrap();
        assert!(failed.completed_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("download failed"));
        assert_eq!(failed.started_at, processing.started_at);
    }

    #[test]
    fn progress_outputs_and_errors() {
        let store = store();
        let task = store
            .create("in", "a.mp4", "", types(&["mp4_standard", "thumbnail"]))
            .unwrap();
        let id = task.task_id.as_str();

        store
            .update_progress(id, "mp4_standard", ProgressState::Completed)
            .unwrap();
        store.add_output(id, "mp4_standard", "a_mp4_standard_1.mp4").unwrap();
        store
            .update_progress(id, "thumbnail", ProgressState::Failed)
            .unwrap();
        store
            .add_error_detail(
                id,
                ErrorDetail::new("thumbnail", ErrorStage::Transcode, "exit 1")
                    .with_output("z".repeat(6000)),
            )
            .unwrap();

        let task = store.get(id).unwrap();
        assert_eq!(task.output_files["mp4_standard"], "a_mp4_standard_1.mp4");
        assert!(!task.output_files.contains_key("thumbnail"));
        assert_eq!(task.error_details.len(), 1);
        assert!(task.error_details[0]
            .output
            .as_deref()
            .unwrap()
            .ends_with("[truncated]"));
    }

    #[test]
    fn retry_rejected_only_while_processing() {
        let store = store();
        let task = store.create("in", "a.mp4", "", types(&["thumbnail"])).unwrap();
        let id = task.task_id.as_str();

        store.update_status(id, TaskStatus::Processing, None).unwrap();
        let err = store.retry(id).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        for status in [
            TaskStatus::Pending,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Retrying,
        ] {
            store.update_status(id, status, None).unwrap();
            assert!(store.retry(id).is_ok(), "retry from {status} should succeed");
        }
    }

    #[test]
    fn retry_resets_everything() {
        let store = store();
        let task = store
            .create("in", "a.mp4", "", types(&["mp4_standard", "thumbnail"]))
            .unwrap();
        let id = task.task_id.as_str();
        store.update_status(id, TaskStatus::Processing, None).unwrap();
        store
            .update_progress(id, "mp4_standard", ProgressState::Completed)
            .unwrap();
        store.add_output(id, "mp4_standard", "x.mp4").unwrap();
        store
            .add_error_detail(id, ErrorDetail::new("thumbnail", ErrorStage::Transcode, "bad"))
            .unwrap();
        store.update_status(id, TaskStatus::Failed, Some("bad")).unwrap();

        let retried = store.retry(id).unwrap();
        assert_eq!(retried.status, TaskStatus::Retrying);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.output_files.is_empty());
        assert!(retried.error_details.is_empty());
        assert!(retried.error_message.is_none());
        assert!(retried.started_at.is_none());
        assert!(retried.completed_at.is_none());
        assert!(retried
            .progress
            .values()
            .all(|s| *s == ProgressState::Pending));
    }

    #[test]
    fn mark_incomplete_failed_leaves_completed() {
        let store = store();
        let task = store
            .create("in", "a.mp4", "", types(&["mp4_standard", "thumbnail"]))
            .unwrap();
        let id = task.task_id.as_str();
        store
            .update_progress(id, "mp4_standard", ProgressState::Completed)
            .unwrap();
        let task = store.mark_incomplete_failed(id).unwrap();
        assert_eq!(task.progress["mp4_standard"], ProgressState::Completed);
        assert_eq!(task.progress["thumbnail"], ProgressState::Failed);
    }

    #[test]
    fn is_aborted_tracks_processing() {
        let store = store();
        let task = store.create("in", "a.mp4", "", types(&["thumbnail"])).unwrap();
        let id = task.task_id.as_str();
        store.update_status(id, TaskStatus::Processing, None).unwrap();
        assert!(!store.is_aborted(id).unwrap());
        store.update_status(id, TaskStatus::Failed, Some("aborted by user")).unwrap();
        assert!(store.is_aborted(id).unwrap());
    }

    #[test]
    fn begin_type_refuses_after_abort_marks_types() {
        let store = store();
        let task = store
            .create("in", "a.mp4", "", types(&["mp4_standard", "thumbnail"]))
            .unwrap();
        let id = task.task_id.as_str();
        store.begin_run(id).unwrap();
        assert!(store.begin_type(id, "mp4_standard").unwrap());

        // First half of an abort: types failed, status not yet moved.
        store.mark_incomplete_failed(id).unwrap();
        assert!(!store.begin_type(id, "thumbnail").unwrap());
        assert_eq!(store.get(id).unwrap().progress["thumbnail"], ProgressState::Failed);

        store.update_status(id, TaskStatus::Failed, Some("aborted by user")).unwrap();
        assert!(!store.begin_type(id, "thumbnail").unwrap());
    }

    #[test]
    fn begin_run_resets_unfinished_entries() {
        let store = store();
        let task = store
            .create("in", "a.mp4", "", types(&["mp4_standard", "thumbnail"]))
            .unwrap();
        let id = task.task_id.as_str();
        store.begin_run(id).unwrap();
        store
            .update_progress(id, "mp4_standard", ProgressState::Completed)
            .unwrap();
        store
            .update_progress(id, "thumbnail", ProgressState::Failed)
            .unwrap();

        // Redelivered after the first run died mid-way.
        let task = store.begin_run(id).unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress["mp4_standard"], ProgressState::Completed);
        assert_eq!(task.progress["thumbnail"], ProgressState::Pending);
        assert!(store.begin_type(id, "thumbnail").unwrap());
    }

    #[test]
    fn strategy_selection() {
        let date = ListFilter {
            status: Some(TaskStatus::Failed),
            date: Some("2025-01-15".into()),
        };
        assert_eq!(ListStrategy::for_filter(&date), ListStrategy::ByDate);
        let status = ListFilter {
            status: Some(TaskStatus::Failed),
            date: None,
        };
        assert_eq!(ListStrategy::for_filter(&status), ListStrategy::ByStatus);
        assert_eq!(
            ListStrategy::for_filter(&ListFilter::default()),
            ListStrategy::Scan
        );
    }

    #[test]
    fn limit_is_clamped() {
        let store = store();
        assert_eq!(store.clamp_limit(0), 10);
        assert_eq!(store.clamp_limit(25), 25);
        assert_eq!(store.clamp_limit(1000), 100);
    }

    #[test]
    fn offset_past_total_returns_empty_with_total() {
        let store = store();
        for i in 0..15 {
            seed(&store, &format!("t{i:02}"), "2025-01-15", i, TaskStatus::Completed);
        }
        seed(&store, "other-day", "2025-01-16", 0, TaskStatus::Completed);

        let filter = ListFilter {
            status: None,
            date: Some("2025-01-15".into()),
        };
        let page = store.list(&filter, 10, 20).unwrap();
        assert!(page.tasks.is_empty());
        assert_eq!(page.total, 15);
        assert_eq!(page.limit, 10);
        assert_eq!(page.offset, 20);
    }

    #[test]
    fn date_listing_is_newest_first_and_paged() {
        let store = store();
        let mut small = TaskDefaults::default();
        small.page_size = 4;
        let store = TaskStore::new(store.store.clone(), small);
        for i in 0..12 {
            seed(&store, &format!("t{i:02}"), "2025-01-15", i, TaskStatus::Pending);
        }

        let filter = ListFilter {
            status: None,
            date: Some("2025-01-15".into()),
        };
        let page = store.list(&filter, 5, 3).unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(ids(&page), ["t08", "t07", "t06", "t05", "t04"]);
    }

    #[test]
    fn status_listing_filters_and_orders() {
        let store = store();
        seed(&store, "a", "2025-01-14", 0, TaskStatus::Failed);
        seed(&store, "b", "2025-01-15", 0, TaskStatus::Completed);
        seed(&store, "c", "2025-01-15", 5, TaskStatus::Failed);

        let filter = ListFilter {
            status: Some(TaskStatus::Failed),
            date: None,
        };
        let page = store.list(&filter, 10, 0).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(ids(&page), ["c", "a"]);
    }

    #[test]
    fn date_and_status_combined() {
        let store = store();
        seed(&store, "a", "2025-01-15", 0, TaskStatus::Failed);
        seed(&store, "b", "2025-01-15", 1, TaskStatus::Completed);
        seed(&store, "c", "2025-01-16", 0, TaskStatus::Failed);

        let filter = ListFilter {
            status: Some(TaskStatus::Failed),
            date: Some("2025-01-15".into()),
        };
        let page = store.list(&filter, 10, 0).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(ids(&page), ["a"]);
    }

    #[test]
    fn scan_listing_sorts_unordered_storage() {
        let mut defaults = TaskDefaults::default();
        defaults.page_size = 3;
        let docs = SqliteDocumentStore::new(init_memory_pool().unwrap());
        let store = TaskStore::new(Arc::new(docs), defaults);

        // Ids deliberately disagree with creation order.
        let minutes = [7, 2, 9, 0, 5, 3, 8, 1, 6, 4];
        for (i, minute) in minutes.iter().enumerate() {
            seed(
                &store,
                &format!("id-{i}"),
                "2025-01-15",
                *minute,
                TaskStatus::Pending,
            );
        }

        let page = store.list(&ListFilter::default(), 3, 2).unwrap();
        assert_eq!(page.total, 10);
        // Creation minutes 7, 6, 5.
        assert_eq!(ids(&page), ["id-0", "id-8", "id-4"]);
    }

    #[test]
    fn totals_match_full_enumeration() {
        let store = store();
        let statuses = [
            TaskStatus::Pending,
            TaskStatus::Failed,
            TaskStatus::Completed,
        ];
        for i in 0..20 {
            let date = if i % 3 == 0 { "2025-01-14" } else { "2025-01-15" };
            seed(&store, &format!("t{i:02}"), date, i, statuses[i as usize % 3]);
        }

        let all = store.list(&ListFilter::default(), 100, 0).unwrap().tasks;
        for status in [None, Some(TaskStatus::Failed), Some(TaskStatus::Pending)] {
            for date in [None, Some("2025-01-14"), Some("2025-01-15")] {
                let filter = ListFilter {
                    status,
                    date: date.map(String::from),
                };
                let expected = all
                    .iter()
                    .filter(|t| status.map_or(true, |s| t.status == s))
                    .filter(|t| date.map_or(true, |d| t.date_partition == d))
                    .count();
                let page = store.list(&filter, 5, 0).unwrap();
                assert_eq!(page.total, expected, "filter {filter:?}");
                assert_eq!(page.tasks.len(), expected.min(5));
            }
        }
    }
}
