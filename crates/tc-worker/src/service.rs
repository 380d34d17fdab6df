//! Producer-side task lifecycle operations.
//!
//! [`TaskService`] pairs each [`TaskStore`](tc_db::TaskStore) transition
//! with the broker action that goes with it: submit and retry enqueue a
//! message, cancel tries to pull the queued one back out.

use serde::Serialize;
use tc_core::{Error, ListFilter, QueueMessage, Result, Task, TaskPage, TaskStatus};
use tc_queue::QueueDepth;

use crate::context::AppContext;

/// A new unit of work.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// Defaults to the configured input bucket.
    pub input_bucket: Option<String>,
    pub input_key: String,
    /// Empty means the worker's default output bucket.
    pub output_bucket: Option<String>,
    pub transcode_types: Vec<String>,
}

/// Result of a cancel.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub task: Task,
    /// Whether the queued message was found and deleted.
    pub removed_from_queue: bool,
}

#[derive(Clone)]
pub struct TaskService {
    ctx: AppContext,
}

impl TaskService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Create a task and enqueue it.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task> {
        let input_bucket = request
            .input_bucket
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.ctx.config.worker.input_bucket.clone());
        if input_bucket.is_empty() {
            return Err(Error::Validation(
                "no input bucket given and none configured".into(),
            ));
        }
        if request.input_key.is_empty() {
            return Err(Error::Validation("input key is required".into()));
        }
        if request.transcode_types.is_empty() {
            return Err(Error::Validation(
                "at least one transcode type is required".into(),
            ));
        }
        for t in &request.transcode_types {
            self.ctx.profiles.get(t)?;
        }

        let task = self.ctx.store.create(
            &input_bucket,
            &request.input_key,
            request.output_bucket.as_deref().unwrap_or_default(),
            request.transcode_types,
        )?;
        self.enqueue(&task).await?;
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Result<Task> {
        self.ctx.store.get(task_id)
    }

    pub fn list(&self, filter: &ListFilter, limit: usize, offset: usize) -> Result<TaskPage> {
        self.ctx.store.list(filter, limit, offset)
    }

    /// Reset a task and enqueue it again.
    ///
    /// With `tasks.enforce_max_retries` set, a task whose retry count has
    /// reached its ceiling is rejected.
    pub async fn retry(&self, task_id: &str) -> Result<Task> {
        if self.ctx.config.tasks.enforce_max_retries {
            let task = self.ctx.store.get(task_id)?;
            if task.retries_exhausted() {
                return Err(Error::invalid_state(format!(
                    "task {task_id} has used all {} retries",
                    task.max_retries
                )));
            }
        }

        let task = self.ctx.store.retry(task_id)?;
        self.enqueue(&task).await?;
        Ok(task)
    }

    /// Cancel a task that has not started. The queued message is removed
    /// if it can be found; cancellation stands either way.
    pub async fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        let task = self.ctx.store.get(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(Error::invalid_state(format!(
                "task {task_id} is {} and cannot be cancelled",
                task.status
            )));
        }

        let removed_from_queue = match self.ctx.queue.remove_by_task_id(task_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Queue removal failed");
                false
            }
        };

        let task = self.ctx.store.update_status(
            task_id,
            TaskStatus::Cancelled,
            Some("cancelled by user"),
        )?;
        tracing::info!(task_id, removed_from_queue, "Task cancelled");
        Ok(CancelOutcome {
            task,
            removed_from_queue,
        })
    }

    /// Force a running task to fail. Completed types keep their outputs;
    /// every other type is marked failed.
    pub fn abort(&self, task_id: &str) -> Result<Task> {
        let task = self.ctx.store.get(task_id)?;
        if task.status != TaskStatus::Processing {
            return Err(Error::invalid_state(format!(
                "task {task_id} is {} and cannot be aborted",
                task.status
            )));
        }

        self.ctx.store.mark_incomplete_failed(task_id)?;
        let task = self
            .ctx
            .store
            .update_status(task_id, TaskStatus::Failed, Some("aborted by user"))?;
        tracing::info!(task_id, "Task aborted");
        Ok(task)
    }

    pub async fn queue_status(&self) -> Result<QueueDepth> {
        self.ctx.queue.status().await
    }

    /// Drop every queued message. Task records are untouched.
    pub async fn purge(&self) -> Result<usize> {
        self.ctx.queue.purge().await
    }

    async fn enqueue(&self, task: &Task) -> Result<()> {
        if let Err(e) = self.ctx.queue.send(&QueueMessage::for_task(task)).await {
            tracing::error!(task_id = %task.task_id, error = %e, "Failed to enqueue task");
            self.ctx.store.update_status(
                &task.task_id,
                TaskStatus::Failed,
                Some(&format!("failed to enqueue: {e}")),
            )?;
            return Err(e);
        }
        Ok(())
    }
}
