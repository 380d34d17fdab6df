//! Queue wire payloads.
//!
//! [`QueueMessage`] is the canonical body a producer sends. Object-storage
//! creation notifications arrive in a second shape, [`StorageEvent`], which
//! is translated into an equivalent `QueueMessage` with a synthesized task id
//! and the default transcode types.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::Task;

/// Transcode types requested for tasks that originate from storage events.
pub const DEFAULT_EVENT_TYPES: &[&str] = &["mp4_standard", "mp4_smooth", "thumbnail"];

/// Object key extensions accepted from storage events.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "m4v", "mpeg", "mpg",
];

/// Event sources whose records are understood.
const EVENT_SOURCES: &[&str] = &["aws:s3", "minio:s3"];

/// Canonical unit of work carried by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub task_id: String,
    pub input_bucket: String,
    pub input_key: String,
    /// Empty means "use the deployment default".
    #[serde(default)]
    pub output_bucket: String,
    pub transcode_types: Vec<String>,
}

impl QueueMessage {
    /// The message that (re-)drives `task`.
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            input_bucket: task.input_bucket.clone(),
            input_key: task.input_key.clone(),
            output_bucket: task.output_bucket.clone(),
            transcode_types: task.transcode_types.clone(),
        }
    }

    /// Decode a message body, trying the canonical shape first and falling
    /// back to a storage creation event.
    pub fn decode(body: &str) -> Result<Self> {
        if let Ok(msg) = serde_json::from_str::<QueueMessage>(body) {
            return Ok(msg);
        }

        let event: StorageEvent = serde_json::from_str(body)
            .map_err(|e| Error::Validation(format!("unrecognised message body: {e}")))?;
        event.into_queue_message()
    }
}

// ---------------------------------------------------------------------------
// Storage creation events
// ---------------------------------------------------------------------------

/// S3-compatible object notification envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub event_source: String,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub event_time: String,
    pub s3: EventEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventEntity {
    pub bucket: EventBucket,
    pub object: EventObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventObject {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

impl StorageEvent {
    /// Translate the first storage record into a queue message.
    ///
    /// Fails with `Validation` when there is no record from a known source or
    /// when the object key does not look like a video file.
    pub fn into_queue_message(self) -> Result<QueueMessage> {
        let record = self
            .records
            .into_iter()
            .find(|r| EVENT_SOURCES.contains(&r.event_source.as_str()))
            .ok_or_else(|| Error::Validation("no storage record in event".into()))?;

        let key = decode_object_key(&record.s3.object.key);
        if !is_video_key(&key) {
            return Err(Error::Validation(format!("not a video file: {key}")));
        }

        tracing::info!(
            bucket = %record.s3.bucket.name,
            key = %key,
            event = %record.event_name,
            "Translated storage event"
        );

        Ok(QueueMessage {
            task_id: synthesize_task_id(),
            input_bucket: record.s3.bucket.name,
            input_key: key,
            output_bucket: String::new(),
            transcode_types: DEFAULT_EVENT_TYPES.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Keys in notifications are form-encoded: `+` is a space. A key that
/// does not decode is used as sent.
fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(key) => key.into_owned(),
        Err(e) => {
            tracing::warn!(key = %raw, error = %e, "Object key is not valid form encoding; using it as is");
            raw.to_string()
        }
    }
}

/// Whether an object key carries a known video extension.
pub fn is_video_key(key: &str) -> bool {
    std::path::Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

fn synthesize_task_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("s3-{nanos}")
}
