//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over an
//! in-memory database with a temporary blob root and work directory, plus
//! helpers for fake `ffmpeg` scripts and CLI config files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tc_av::{ExecutionEngine, Platform, PlatformCapabilities};
use tc_core::config::Config;
use tc_core::Task;
use tc_worker::{AppContext, TaskService};
use tempfile::TempDir;

/// Writes its last argument (the output path) and succeeds.
pub const FFMPEG_OK: &str = r#"for a; do last="$a"; done
echo encoded > "$last"
exit 0"#;

/// Fails every NVENC request with an NVENC error; anything else succeeds.
pub const FFMPEG_NO_NVENC: &str = r#"for a; do last="$a"; done
case "$*" in
  *hevc_nvenc*) echo "[hevc_nvenc @ 0x55] OpenEncodeSessionEx failed: unsupported device (2): (no details)" >&2; exit 1;;
esac
echo encoded > "$last"
exit 0"#;

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub service: TaskService,
    pub root: TempDir,
}

impl TestHarness {
    /// Harness with the default test configuration.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let config = test_config(root.path());
        std::fs::create_dir_all(&config.worker.temp_dir).unwrap();
        let ctx = AppContext::in_memory(config).expect("failed to create context");
        let service = TaskService::new(ctx.clone());
        Self { ctx, service, root }
    }

    /// An engine running `script` as ffmpeg on a host of the given platform.
    #[cfg(unix)]
    pub fn engine(&self, platform: Platform, script: &str) -> Arc<ExecutionEngine> {
        let ffmpeg = write_script(self.root.path(), "ffmpeg", script);
        Arc::new(ExecutionEngine::new(
            Arc::new(PlatformCapabilities::new(platform)),
            self.ctx.profiles.clone(),
            ffmpeg,
            &self.ctx.config.encoding,
            self.ctx.config.worker.temp_dir.clone(),
        ))
    }

    pub fn blob(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.path().join("blobs").join(bucket).join(key)
    }

    /// Place an input object in the `uploads` bucket.
    pub fn put_input(&self, key: &str) {
        let path = self.blob("uploads", key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"source video").unwrap();
    }

    pub fn create_task(&self, key: &str, types: &[&str]) -> Task {
        self.ctx
            .store
            .create("uploads", key, "", types.iter().map(|t| t.to_string()).collect())
            .unwrap()
    }
}

/// Configuration rooted in `dir`, with short polls for tests.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.db_path = dir.join("transcoder.db");
    config.storage.blob_root = dir.join("blobs");
    config.worker.temp_dir = dir.join("work");
    config.worker.input_bucket = "uploads".into();
    config.worker.default_output_bucket = "media".into();
    config.worker.concurrency = 2;
    config.worker.abort_poll_secs = 1;
    config.worker.shutdown_grace_secs = 5;
    config.queue.wait_secs = 1;
    config.queue.removal_lease_secs = 0;
    config
}

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write `config` as JSON under `dir` and return its path.
pub fn write_config(dir: &Path, config: &Config) -> PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    path
}
