//! [`QueueBroker`]: typed queue operations over a [`MessageBroker`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tc_core::config::QueueConfig;
use tc_core::{Error, QueueMessage, Result};

use crate::broker::{MessageBroker, QueueDepth, ReceiveRequest};

/// Message attribute carrying the task id, so a message can be matched
/// without decoding its body.
pub const TASK_ID_ATTRIBUTE: &str = "TaskID";

/// A decoded message and the handle needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub message: QueueMessage,
    pub receive_count: u32,
}

/// Queue of [`QueueMessage`]s.
#[derive(Clone)]
pub struct QueueBroker {
    broker: Arc<dyn MessageBroker>,
    lease: Duration,
    removal_batch: usize,
    removal_lease: Duration,
}

impl QueueBroker {
    pub fn new(broker: Arc<dyn MessageBroker>, config: &QueueConfig) -> Self {
        Self {
            broker,
            lease: config.lease(),
            removal_batch: config.removal_batch.max(1),
            removal_lease: config.removal_lease(),
        }
    }

    /// Enqueue a message, tagging it with its task id.
    pub async fn send(&self, message: &QueueMessage) -> Result<String> {
        let body = serde_json::to_string(message)
            .map_err(|e| Error::Internal(format!("failed to encode queue message: {e}")))?;
        let attributes =
            HashMap::from([(TASK_ID_ATTRIBUTE.to_string(), message.task_id.clone())]);
        let message_id = self.broker.send(body, attributes).await?;
        tracing::info!(task_id = %message.task_id, message_id = %message_id, "Queued task");
        Ok(message_id)
    }

    /// Receive up to `max` messages, waiting up to `wait` for the first.
    ///
    /// Bodies that decode neither as a queue message nor as a storage event
    /// (including events for non-video objects) are logged and acknowledged
    /// so they do not come back after every lease.
    pub async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedMessage>> {
        let raw = self
            .broker
            .receive(&ReceiveRequest {
                max_messages: max,
                wait,
                lease: self.lease,
            })
            .await?;

        let mut out = Vec::with_capacity(raw.len());
        for msg in raw {
            match QueueMessage::decode(&msg.body) {
                Ok(message) => out.push(ReceivedMessage {
                    message_id: msg.message_id,
                    receipt_handle: msg.receipt_handle,
                    message,
                    receive_count: msg.receive_count,
                }),
                Err(e) => {
                    tracing::warn!(message_id = %msg.message_id, error = %e, "Dropping undecodable message");
                    if let Err(e) = self.broker.delete(&msg.receipt_handle).await {
                        tracing::warn!(message_id = %msg.message_id, error = %e, "Failed to drop message");
                    }
                }
            }
        }
        Ok(out)
    }

    /// Acknowledge a message.
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.broker.delete(receipt_handle).await
    }

    /// Drop every queued message.
    pub async fn purge(&self) -> Result<usize> {
        let n = self.broker.purge().await?;
        tracing::warn!(removed = n, "Queue purged");
        Ok(n)
    }

    pub async fn status(&self) -> Result<QueueDepth> {
        self.broker.depth().await
    }

    /// Best-effort removal of a still-queued message for `task_id`.
    ///
    /// Looks at one batch of currently visible messages without waiting.
    /// Matches on the task-id attribute first, then on the decoded body,
    /// which is checked even when the attribute names another task.
    /// Returns `false` when nothing matched. That is not an error: the
    /// message may be leased by a worker or already processed. Inspected
    /// messages that did not match become visible again when the short
    /// inspection lease ends.
    pub async fn remove_by_task_id(&self, task_id: &str) -> Result<bool> {
        let batch = self
            .broker
            .receive(&ReceiveRequest {
                max_messages: self.removal_batch,
                wait: Duration::ZERO,
                lease: self.removal_lease,
            })
            .await?;

        for msg in batch {
            let matches = msg
                .attributes
                .get(TASK_ID_ATTRIBUTE)
                .is_some_and(|id| id == task_id)
                || QueueMessage::decode(&msg.body)
                    .map(|m| m.task_id == task_id)
                    .unwrap_or(false);
            if matches {
                self.broker.delete(&msg.receipt_handle).await?;
                tracing::info!(task_id = %task_id, message_id = %msg.message_id, "Removed queued message");
                return Ok(true);
            }
        }

        tracing::debug!(task_id = %task_id, "No queued message found for task");
        Ok(false)
    }
}
