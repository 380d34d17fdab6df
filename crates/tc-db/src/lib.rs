//! tc-db: persistence layer.
//!
//! This crate provides SQLite-backed storage with connection pooling and
//! embedded migrations, the [`DocumentStore`] contract that task
//! persistence is written against, the raw message-table queries used by
//! the SQLite broker, and [`TaskStore`], which owns every task state
//! transition.

pub mod document;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod task_store;

pub use document::{
    DocumentPage, DocumentStore, IndexQuery, PageCursor, Projection, ScanRequest,
    SqliteDocumentStore, TaskIndex,
};
pub use task_store::{ListStrategy, TaskDefaults, TaskStore};
