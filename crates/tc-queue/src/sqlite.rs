//! SQLite-backed [`MessageBroker`].
//!
//! Messages live in the `queue_messages` table of the shared database.
//! Receives long-poll: they re-check the table at a short interval (or as
//! soon as a send from this process lands) until a message is claimed or
//! the wait runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tc_core::{Error, Result};
use tc_db::pool::{get_conn, DbPool};
use tc_db::queries::messages;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{BrokerMessage, MessageBroker, QueueDepth, ReceiveRequest};
use crate::queue::TASK_ID_ATTRIBUTE;

/// Re-check interval while long-polling an empty queue.
const POLL_STEP: Duration = Duration::from_millis(250);

/// Broker over the `queue_messages` table.
#[derive(Clone)]
pub struct SqliteBroker {
    pool: DbPool,
    arrivals: Arc<Notify>,
}

impl SqliteBroker {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            arrivals: Arc::new(Notify::new()),
        }
    }

    fn claim(&self, request: &ReceiveRequest) -> Result<Vec<BrokerMessage>> {
        let conn = get_conn(&self.pool).map_err(transport)?;
        let claimed = messages::claim_visible(
            &conn,
            now_ms(),
            request.lease.as_millis() as i64,
            request.max_messages,
        )
        .map_err(transport)?;

        Ok(claimed
            .into_iter()
            .map(|m| BrokerMessage {
                message_id: m.message_id,
                receipt_handle: m.receipt_handle,
                body: m.body,
                attributes: m.attributes,
                receive_count: m.receive_count,
            })
            .collect())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn transport(e: Error) -> Error {
    Error::transport(format!("queue: {e}"))
}

#[async_trait]
impl MessageBroker for SqliteBroker {
    async fn send(&self, body: String, attributes: HashMap<String, String>) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let task_id = attributes.get(TASK_ID_ATTRIBUTE).map(String::as_str);
        {
            let conn = get_conn(&self.pool).map_err(transport)?;
            messages::insert_message(&conn, &message_id, &body, &attributes, task_id, now_ms())
                .map_err(transport)?;
        }
        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<BrokerMessage>> {
        if request.max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + request.wait;
        loop {
            let batch = self.claim(request)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            let step = POLL_STEP.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = self.arrivals.notified() => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let conn = get_conn(&self.pool).map_err(transport)?;
        if !messages::delete_by_receipt(&conn, receipt_handle).map_err(transport)? {
            tracing::debug!(receipt_handle, "Delete with stale receipt handle ignored");
        }
        Ok(())
    }

    async fn purge(&self) -> Result<usize> {
        let conn = get_conn(&self.pool).map_err(transport)?;
        messages::purge(&conn).map_err(transport)
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let conn = get_conn(&self.pool).map_err(transport)?;
        let (visible, in_flight) = messages::depth(&conn, now_ms()).map_err(transport)?;
        Ok(QueueDepth { visible, in_flight })
    }
}
