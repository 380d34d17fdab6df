//! tc-worker: the task-processing side of the transcoder.
//!
//! - [`WorkerPool`] runs the polling loops that drive received messages
//!   through [`processor`].
//! - [`TaskService`] holds the producer-side lifecycle operations (submit,
//!   retry, cancel, abort) that pair task transitions with broker actions.
//! - [`BlobStore`] is the object transfer contract, with a filesystem
//!   implementation.

pub mod blob;
pub mod context;
pub mod pool;
pub mod processor;
pub mod service;

#[cfg(all(test, unix))]
mod test_support;

pub use blob::{BlobStore, FsBlobStore};
pub use context::AppContext;
pub use pool::{shutdown_signal, WorkerPool};
pub use service::{CancelOutcome, SubmitRequest, TaskService};
