//! Task data model: status enums, the task record, and error history.
//!
//! All enums serialize in lowercase and implement `Display` and `FromStr`
//! with the same spelling, so the strings stored in secondary indexes match
//! what the JSON documents carry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Maximum stored length of a failing command line.
pub const MAX_COMMAND_CHARS: usize = 1000;

/// Maximum stored length of captured encoder output.
pub const MAX_OUTPUT_CHARS: usize = 5000;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Retrying,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown task status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// ProgressState
// ---------------------------------------------------------------------------

/// Per-transcode-type progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProgressState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorStage / ErrorDetail
// ---------------------------------------------------------------------------

/// The step of task processing at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Download,
    Prepare,
    Transcode,
    Upload,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Prepare => write!(f, "prepare"),
            Self::Transcode => write!(f, "transcode"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// One entry of a task's error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Failing transcode type; empty for task-level failures.
    #[serde(default)]
    pub transcode_type: String,
    pub stage: ErrorStage,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorDetail {
    pub fn new(
        transcode_type: impl Into<String>,
        stage: ErrorStage,
        error: impl Into<String>,
    ) -> Self {
        Self {
            transcode_type: transcode_type.into(),
            stage,
            error: error.into(),
            command: None,
            output: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into()).filter(|c: &String| !c.is_empty());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into()).filter(|o: &String| !o.is_empty());
        self
    }

    /// Bound the command and output to their storage limits.
    pub fn truncated(mut self) -> Self {
        self.command = self
            .command
            .map(|c| truncate_chars(c, MAX_COMMAND_CHARS, "... [truncated]"));
        self.output = self
            .output
            .map(|o| truncate_chars(o, MAX_OUTPUT_CHARS, "\n... [truncated]"));
        self
    }
}

fn truncate_chars(s: String, max: usize, suffix: &str) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => {
            let mut out = s[..cut].to_string();
            out.push_str(suffix);
            out
        }
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The durable record of one unit of transcode work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    /// Creation date (`YYYY-MM-DD`, UTC) used for time-scoped queries.
    pub date_partition: String,
    pub input_bucket: String,
    pub input_key: String,
    #[serde(default)]
    pub output_bucket: String,
    pub transcode_types: Vec<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_details: Vec<ErrorDetail>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub progress: BTreeMap<String, ProgressState>,
    #[serde(default)]
    pub output_files: BTreeMap<String, String>,
}

impl Task {
    /// Build a fresh `pending` task with every requested type's progress at
    /// `pending`.
    pub fn new(
        task_id: impl Into<String>,
        input_bucket: impl Into<String>,
        input_key: impl Into<String>,
        output_bucket: impl Into<String>,
        transcode_types: Vec<String>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        let progress = transcode_types
            .iter()
            .map(|t| (t.clone(), ProgressState::Pending))
            .collect();

        Self {
            task_id: task_id.into(),
            date_partition: date_partition(&now),
            input_bucket: input_bucket.into(),
            input_key: input_key.into(),
            output_bucket: output_bucket.into(),
            transcode_types,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            error_details: Vec::new(),
            retry_count: 0,
            max_retries,
            progress,
            output_files: BTreeMap::new(),
        }
    }

    /// Whether the retry counter has reached the ceiling.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Reset to the `retrying` state: counters, error state, timestamps,
    /// progress and outputs.
    pub fn reset_for_retry(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Retrying;
        self.error_message = None;
        self.error_details.clear();
        self.started_at = None;
        self.completed_at = None;
        for state in self.progress.values_mut() {
            *state = ProgressState::Pending;
        }
        for t in &self.transcode_types {
            self.progress.entry(t.clone()).or_insert(ProgressState::Pending);
        }
        self.output_files.clear();
    }

    /// Flip every per-type entry that is not `completed` to `failed`.
    pub fn mark_incomplete_failed(&mut self) {
        for state in self.progress.values_mut() {
            if *state != ProgressState::Completed {
                *state = ProgressState::Failed;
            }
        }
    }

    /// Apply a status change, stamping timestamps and the optional message.
    pub fn apply_status(&mut self, status: TaskStatus, message: Option<&str>) {
        let now = Utc::now();
        self.status = status;
        match status {
            TaskStatus::Processing if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                self.completed_at = Some(now);
            }
            _ => {}
        }
        if let Some(msg) = message.filter(|m| !m.is_empty()) {
            self.error_message = Some(msg.to_string());
        }
    }
}

/// Format the date partition key for a timestamp.
pub fn date_partition(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Outcome aggregation
// ---------------------------------------------------------------------------

/// Aggregate result of one processing run over all transcode types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task was aborted externally; its status is left as the abort set it.
    Aborted,
    /// At least one type (or download/upload) failed.
    Failed,
    /// Every requested type succeeded.
    Completed,
}

impl TaskOutcome {
    /// `aborted` takes precedence over `has_error`, which takes precedence
    /// over success.
    pub fn aggregate(aborted: bool, has_error: bool) -> Self {
        if aborted {
            TaskOutcome::Aborted
        } else if has_error {
            TaskOutcome::Failed
        } else {
            TaskOutcome::Completed
        }
    }

    /// Derive the outcome from the per-type progress of a finished run.
    pub fn from_progress(task: &Task, aborted: bool) -> Self {
        let has_error = task
            .transcode_types
            .iter()
            .any(|t| task.progress.get(t) != Some(&ProgressState::Completed));
        Self::aggregate(aborted, has_error)
    }

    /// Status to persist for this outcome, if any.
    pub fn final_status(&self) -> Option<(TaskStatus, Option<&'static str>)> {
        match self {
            TaskOutcome::Aborted => None,
            TaskOutcome::Failed => Some((
                TaskStatus::Failed,
                Some("one or more transcode types failed"),
            )),
            TaskOutcome::Completed => Some((TaskStatus::Completed, None)),
        }
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Optional filters for task listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<TaskStatus>,
    /// Date partition (`YYYY-MM-DD`).
    pub date: Option<String>,
}

/// One page of listed tasks plus the total matching count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_task_initialises_progress() {
        let task = Task::new(
            "t1",
            "in",
            "video.mp4",
            "",
            types(&["mp4_standard", "thumbnail"]),
            3,
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress.len(), 2);
        assert!(task
            .progress
            .values()
            .all(|s| *s == ProgressState::Pending));
        assert_eq!(task.date_partition, date_partition(&task.created_at));
        assert_eq!(task.date_partition.len(), 10);
    }

    #[test]
    fn duplicate_types_are_kept_in_order() {
        let task = Task::new("t1", "in", "a.mp4", "", types(&["thumbnail", "thumbnail"]), 3);
        assert_eq!(task.transcode_types, types(&["thumbnail", "thumbnail"]));
        assert_eq!(task.progress.len(), 1);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn apply_status_stamps_timestamps() {
        let mut task = Task::new("t1", "in", "a.mp4", "", types(&["thumbnail"]), 3);
        task.apply_status(TaskStatus::Processing, None);
        let started = task.started_at.expect("started_at set");

        task.apply_status(TaskStatus::Processing, Some(""));
        assert_eq!(task.started_at, Some(started));
        assert!(task.error_message.is_none());

        task.apply_status(TaskStatus::Failed, Some("boom"));
        assert!(task.completed_at.is_some());
        assert_eq!(task.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn mark_incomplete_failed_keeps_completed() {
        let mut task = Task::new(
            "t1",
            "in",
            "a.mp4",
            "",
            types(&["mp4_standard", "mp4_smooth", "thumbnail"]),
            3,
        );
        task.progress
            .insert("mp4_standard".into(), ProgressState::Completed);
        task.progress
            .insert("mp4_smooth".into(), ProgressState::Processing);
        task.mark_incomplete_failed();

        assert_eq!(task.progress["mp4_standard"], ProgressState::Completed);
        assert_eq!(task.progress["mp4_smooth"], ProgressState::Failed);
        assert_eq!(task.progress["thumbnail"], ProgressState::Failed);
    }

    #[test]
    fn reset_for_retry_clears_state() {
        let mut task = Task::new("t1", "in", "a.mp4", "", types(&["thumbnail"]), 3);
        task.apply_status(TaskStatus::Processing, None);
        task.progress.insert("thumbnail".into(), ProgressState::Failed);
        task.output_files.insert("thumbnail".into(), "a.jpg".into());
        task.error_details
            .push(ErrorDetail::new("thumbnail", ErrorStage::Transcode, "bad"));
        task.apply_status(TaskStatus::Failed, Some("bad"));

        task.reset_for_retry();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.retry_count, 1);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(task.error_message.is_none());
        assert!(task.error_details.is_empty());
        assert!(task.output_files.is_empty());
        assert_eq!(task.progress["thumbnail"], ProgressState::Pending);
    }

    #[test]
    fn error_detail_truncates_command_and_output() {
        let detail = ErrorDetail::new("mp4_standard", ErrorStage::Transcode, "exit 1")
            .with_command("x".repeat(1500))
            .with_output("y".repeat(6000))
            .truncated();

        let command = detail.command.unwrap();
        assert!(command.ends_with("... [truncated]"));
        assert_eq!(command.chars().count(), 1000 + "... [truncated]".len());

        let output = detail.output.unwrap();
        assert!(output.ends_with("\n... [truncated]"));
        assert_eq!(output.chars().count(), 5000 + "\n... [truncated]".len());
    }

    #[test]
    fn short_error_detail_is_untouched() {
        let detail = ErrorDetail::new("", ErrorStage::Download, "missing")
            .with_output("Bucket: in, Key: a.mp4")
            .truncated();
        assert_eq!(detail.output.as_deref(), Some("Bucket: in, Key: a.mp4"));
        assert!(detail.command.is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let detail = ErrorDetail::new("t", ErrorStage::Transcode, "e")
            .with_command("é".repeat(1001))
            .truncated();
        assert!(detail.command.unwrap().starts_with('é'));
    }

    #[test]
    fn outcome_precedence() {
        assert_eq!(TaskOutcome::aggregate(true, true), TaskOutcome::Aborted);
        assert_eq!(TaskOutcome::aggregate(false, true), TaskOutcome::Failed);
        assert_eq!(TaskOutcome::aggregate(false, false), TaskOutcome::Completed);
        assert!(TaskOutcome::Aborted.final_status().is_none());
    }

    #[test]
    fn outcome_from_mixed_progress_is_failed() {
        let mut task = Task::new(
            "t1",
            "in",
            "a.mp4",
            "",
            types(&["mp4_standard", "thumbnail"]),
            3,
        );
        task.progress
            .insert("mp4_standard".into(), ProgressState::Completed);
        task.progress.insert("thumbnail".into(), ProgressState::Failed);

        let outcome = TaskOutcome::from_progress(&task, false);
        assert_eq!(outcome, TaskOutcome::Failed);
        assert_eq!(outcome.final_status().unwrap().0, TaskStatus::Failed);
    }

    #[test]
    fn task_json_uses_lowercase_enums() {
        let task = Task::new("t1", "in", "a.mp4", "", types(&["thumbnail"]), 3);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["progress"]["thumbnail"], "pending");
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
