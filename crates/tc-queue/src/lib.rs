//! tc-queue: work queue for transcode tasks.
//!
//! - **Broker contract** ([`MessageBroker`]) -- send with attributes,
//!   leased receive, delete by receipt handle, purge, and depth.
//! - **SQLite broker** ([`SqliteBroker`]) -- the shipped implementation,
//!   sharing the task database so producers and workers on one host need
//!   nothing else.
//! - **Queue facade** ([`QueueBroker`]) -- speaks [`tc_core::QueueMessage`],
//!   decodes storage-event bodies, and removes queued work by task id.

pub mod broker;
pub mod queue;
pub mod sqlite;

pub use broker::{BrokerMessage, MessageBroker, QueueDepth, ReceiveRequest};
pub use queue::{QueueBroker, ReceivedMessage, TASK_ID_ATTRIBUTE};
pub use sqlite::SqliteBroker;
