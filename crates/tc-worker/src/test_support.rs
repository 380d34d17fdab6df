//! Shared fixtures for worker tests: an in-memory context, a blob root,
//! and a shell script standing in for ffmpeg.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tc_av::{ExecutionEngine, Platform, PlatformCapabilities};
use tc_core::config::Config;
use tc_core::{Error, Result, Task};
use tc_db::pool::init_memory_pool;
use tc_db::{
    DocumentPage, DocumentStore, IndexQuery, ScanRequest, SqliteDocumentStore, TaskDefaults,
    TaskStore,
};
use tempfile::TempDir;

use crate::context::AppContext;

/// Writes its last argument (the output path) and succeeds.
pub const ENCODE_OK: &str = r#"for a; do last="$a"; done
echo encoded > "$last"
exit 0"#;

/// Starts writing output, then hangs until killed.
pub const ENCODE_SLOW: &str = r#"for a; do last="$a"; done
echo partial > "$last"
exec sleep 10"#;

pub struct Harness {
    pub ctx: AppContext,
    pub engine: Arc<ExecutionEngine>,
    root: TempDir,
}

impl Harness {
    pub fn new(ffmpeg_body: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let temp_dir = root.path().join("work");
        std::fs::create_dir_all(&temp_dir).unwrap();

        let mut config = Config::default();
        config.storage.blob_root = root.path().join("blobs");
        config.worker.temp_dir = temp_dir.clone();
        config.worker.input_bucket = "in".into();
        config.worker.default_output_bucket = "out".into();
        config.worker.abort_poll_secs = 1;
        config.worker.shutdown_grace_secs = 5;
        config.queue.wait_secs = 1;
        config.queue.removal_lease_secs = 0;

        let ffmpeg = root.path().join("ffmpeg");
        std::fs::write(&ffmpeg, format!("#!/bin/sh\n{ffmpeg_body}\n")).unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = AppContext::in_memory(config).unwrap();
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(PlatformCapabilities::new(Platform::Cpu)),
            ctx.profiles.clone(),
            ffmpeg,
            &ctx.config.encoding,
            temp_dir,
        ));

        Self { ctx, engine, root }
    }

    /// Swap in a task store whose `n`th document write (1-based, counted
    /// from now) fails once.
    pub fn fail_write(&mut self, n: usize) {
        let documents = FailingWrites {
            inner: SqliteDocumentStore::new(init_memory_pool().unwrap()),
            writes: AtomicUsize::new(0),
            fail_at: n,
        };
        self.ctx.store = Arc::new(TaskStore::new(Arc::new(documents), TaskDefaults::default()));
    }

    fn blob(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.path().join("blobs").join(bucket).join(key)
    }

    /// Place an input object in the `in` bucket.
    pub fn put_input(&self, key: &str) {
        let path = self.blob("in", key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"source video").unwrap();
    }

    pub fn output_exists(&self, key: &str) -> bool {
        self.blob("out", key).exists()
    }

    pub fn create_task(&self, key: &str, types: &[&str]) -> Task {
        self.ctx
            .store
            .create("in", key, "", types.iter().map(|t| t.to_string()).collect())
            .unwrap()
    }

    pub fn temp_is_empty(&self) -> bool {
        let dir: &Path = &self.ctx.config.worker.temp_dir;
        std::fs::read_dir(dir).unwrap().next().is_none()
    }
}

/// Document store that fails exactly one `put`.
struct FailingWrites {
    inner: SqliteDocumentStore,
    writes: AtomicUsize,
    fail_at: usize,
}

impl DocumentStore for FailingWrites {
    fn get(&self, task_id: &str) -> Result<Option<Task>> {
        self.inner.get(task_id)
    }

    fn put(&self, task: &Task) -> Result<()> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(Error::database("disk I/O error"));
        }
        self.inner.put(task)
    }

    fn delete(&self, task_id: &str) -> Result<bool> {
        self.inner.delete(task_id)
    }

    fn scan(&self, request: &ScanRequest) -> Result<DocumentPage> {
        self.inner.scan(request)
    }

    fn query(&self, request: &IndexQuery) -> Result<DocumentPage> {
        self.inner.query(request)
    }
}
