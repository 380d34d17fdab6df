//! Shared application context.
//!
//! [`AppContext`] wires the configured storage, broker, blob store, and tool
//! registry together once and is cloned into every worker loop and CLI
//! command. The [`ExecutionEngine`] is built separately with
//! [`AppContext::engine`] because it probes the host, which only the
//! commands that encode need.

use std::sync::Arc;

use tc_av::{ExecutionEngine, PlatformCapabilities, ProfileRegistry, ToolRegistry};
use tc_core::config::Config;
use tc_core::Result;
use tc_db::pool::DbPool;
use tc_db::{SqliteDocumentStore, TaskDefaults, TaskStore};
use tc_queue::{QueueBroker, SqliteBroker};

use crate::blob::{BlobStore, FsBlobStore};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<TaskStore>,
    pub queue: QueueBroker,
    pub blobs: Arc<dyn BlobStore>,
    pub tools: Arc<ToolRegistry>,
    pub profiles: Arc<ProfileRegistry>,
}

impl AppContext {
    /// Open the on-disk database named by the config.
    pub fn open(config: Config) -> Result<Self> {
        let pool = tc_db::pool::init_pool(&config.storage.db_path)?;
        Ok(Self::with_pool(config, pool))
    }

    /// Context over an in-memory database, for tests and dry runs.
    pub fn in_memory(config: Config) -> Result<Self> {
        let pool = tc_db::pool::init_memory_pool()?;
        Ok(Self::with_pool(config, pool))
    }

    fn with_pool(config: Config, pool: DbPool) -> Self {
        let documents = Arc::new(SqliteDocumentStore::new(pool.clone()));
        let store = TaskStore::new(documents, TaskDefaults::from(&config.tasks));
        let queue = QueueBroker::new(Arc::new(SqliteBroker::new(pool)), &config.queue);
        let blobs = FsBlobStore::new(config.storage.blob_root.clone());
        let tools = ToolRegistry::discover(&config.tools);
        let profiles = ProfileRegistry::with_overrides(&config.profiles);

        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            queue,
            blobs: Arc::new(blobs),
            tools: Arc::new(tools),
            profiles: Arc::new(profiles),
        }
    }

    /// Replace the blob store.
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    /// Build the execution engine, detecting the platform on first use.
    pub fn engine(&self) -> Result<Arc<ExecutionEngine>> {
        let ffmpeg = self.tools.require("ffmpeg")?.to_path_buf();
        let capabilities = PlatformCapabilities::detect_shared(&self.tools, &self.config.encoding);
        Ok(Arc::new(ExecutionEngine::new(
            capabilities,
            self.profiles.clone(),
            ffmpeg,
            &self.config.encoding,
            self.config.worker.temp_dir.clone(),
        )))
    }

    /// Output bucket for a message, falling back to the deployment default.
    pub fn output_bucket<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() {
            &self.config.worker.default_output_bucket
        } else {
            requested
        }
    }
}
