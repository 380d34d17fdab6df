//! The message-broker contract.
//!
//! Delivery is at-least-once: a received message is hidden for its lease
//! but stays queued until deleted with the receipt handle from that
//! receive. If the lease runs out first the message becomes visible again
//! and the old handle stops working.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tc_core::Result;

/// Parameters for one receive call.
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    /// Upper bound on messages returned.
    pub max_messages: usize,
    /// How long to wait for a message when none is visible.
    pub wait: Duration,
    /// How long returned messages stay hidden from other receivers.
    pub lease: Duration,
}

/// A raw message as handed out by the broker.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub message_id: String,
    /// Opaque acknowledgment handle valid for this lease only.
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    /// How many times this message has been handed out, this time included.
    pub receive_count: u32,
}

/// Approximate queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub visible: usize,
    pub in_flight: usize,
}

/// A message queue with leased delivery.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Enqueue `body` with out-of-band `attributes`; returns the message id.
    async fn send(&self, body: String, attributes: HashMap<String, String>) -> Result<String>;

    /// Receive up to `max_messages`, waiting up to `wait` if none are visible.
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<BrokerMessage>>;

    /// Acknowledge and remove a message. Deleting with a stale handle is a no-op.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Drop every queued message; returns how many were removed.
    async fn purge(&self) -> Result<usize>;

    async fn depth(&self) -> Result<QueueDepth>;
}
