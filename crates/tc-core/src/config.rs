//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! storage, queue, worker, tool, encoding and task sections. Every section
//! defaults sensibly so a completely empty `{}` file is valid. A handful of
//! deployment environment variables override the file afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::profile::Profile;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub tools: ToolsConfig,
    pub encoding: EncodingConfig,
    pub tasks: TaskConfig,
    /// Additional profiles; an entry whose name matches a built-in replaces it.
    pub profiles: Vec<Profile>,
    pub debug: bool,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply deployment environment variables on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("TC_DB_PATH") {
            self.storage.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("TC_BLOB_ROOT") {
            self.storage.blob_root = PathBuf::from(v);
        }
        if let Some(v) = get("INPUT_BUCKET") {
            self.worker.input_bucket = v;
        }
        if let Some(v) = get("OUTPUT_BUCKET") {
            self.worker.default_output_bucket = v;
        }
        if let Some(v) = get("TEMP_DIR") {
            self.worker.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MAX_CONCURRENT_TASKS") {
            match v.parse() {
                Ok(n) => self.worker.concurrency = n,
                Err(_) => tracing::warn!("Ignoring invalid MAX_CONCURRENT_TASKS={v}"),
            }
        }
        if let Some(v) = get("POLL_INTERVAL") {
            match v.trim_end_matches('s').parse() {
                Ok(n) => self.queue.wait_secs = n,
                Err(_) => tracing::warn!("Ignoring invalid POLL_INTERVAL={v}"),
            }
        }
        if let Some(v) = get("DEBUG_MODE") {
            self.debug = v == "true" || v == "1";
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.worker.concurrency == 0 {
            warnings.push("worker.concurrency is 0; no tasks will be processed".into());
        }

        if self.worker.default_output_bucket.is_empty() {
            warnings.push(
                "worker.default_output_bucket is empty; messages without an output bucket will fail to upload".into(),
            );
        }

        if self.queue.lease_secs < 60 {
            warnings.push(format!(
                "queue.lease_secs is {}; messages may be redelivered while still being processed",
                self.queue.lease_secs
            ));
        }

        let valid = ["auto", "none"];
        if !valid.contains(&self.encoding.hw_accel.as_str()) {
            warnings.push(format!(
                "encoding.hw_accel '{}' is not a recognized mode (valid: {})",
                self.encoding.hw_accel,
                valid.join(", ")
            ));
        }

        if self.tasks.max_list_limit == 0 {
            warnings.push("tasks.max_list_limit is 0; listing will clamp to 1".into());
        }

        for (i, profile) in self.profiles.iter().enumerate() {
            if profile.name.is_empty() {
                warnings.push(format!("profiles[{i}].name is empty"));
            }
            if profile.extension.is_empty() {
                warnings.push(format!("profiles[{i}].extension is empty"));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Where the document store and blob store live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Each bucket is a directory under this root.
    pub blob_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/data/transcoder.db"),
            blob_root: PathBuf::from("/data/blobs"),
        }
    }
}

/// Broker receive behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Long-poll wait per receive, which doubles as the idle poll interval.
    pub wait_secs: u64,
    /// How long a received message stays invisible to other receivers.
    pub lease_secs: u64,
    /// Batch size for remove-by-task-id scans.
    pub removal_batch: usize,
    /// Lease applied to messages inspected during remove-by-task-id.
    pub removal_lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_secs: 10,
            lease_secs: 900,
            removal_batch: 10,
            removal_lease_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn removal_lease(&self) -> Duration {
        Duration::from_secs(self.removal_lease_secs)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub temp_dir: PathBuf,
    pub shutdown_grace_secs: u64,
    /// How often an in-flight encode checks whether its task was aborted.
    pub abort_poll_secs: u64,
    /// Default input bucket for producer submissions.
    pub input_bucket: String,
    /// Used when a message carries an empty output bucket.
    pub default_output_bucket: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            temp_dir: PathBuf::from("/tmp/ffmpeg_processing"),
            shutdown_grace_secs: 30,
            abort_poll_secs: 5,
            input_bucket: String::new(),
            default_output_bucket: String::new(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn abort_poll(&self) -> Duration {
        Duration::from_secs(self.abort_poll_secs.max(1))
    }
}

/// Paths to external tools (`None` = discover on `PATH`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: Option<PathBuf>,
    pub nvidia_smi: Option<PathBuf>,
}

/// Encoder execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// `auto` probes for a hardware encoder, `none` forces software.
    pub hw_accel: String,
    pub timeout_secs: u64,
    /// Known-good input used by the test entry point.
    pub sample_input: Option<PathBuf>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            hw_accel: "auto".into(),
            timeout_secs: 6 * 60 * 60,
            sample_input: None,
        }
    }
}

impl EncodingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn hardware_allowed(&self) -> bool {
        self.hw_accel != "none"
    }
}

/// Task bookkeeping and listing bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Ceiling recorded on every new task.
    pub max_retries: u32,
    /// Reject retries once `retry_count` reaches `max_retries`.
    pub enforce_max_retries: bool,
    pub default_list_limit: usize,
    pub max_list_limit: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            enforce_max_retries: false,
            default_list_limit: 10,
            max_list_limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_empty_json_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.queue.wait_secs, 10);
        assert_eq!(config.tasks.max_retries, 3);
        assert!(!config.tasks.enforce_max_retries);
        assert_eq!(config.encoding.hw_accel, "auto");
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{
            "worker": { "concurrency": 4, "default_output_bucket": "out" },
            "queue": { "lease_secs": 120 },
            "encoding": { "hw_accel": "none" }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.default_output_bucket, "out");
        assert_eq!(config.worker.shutdown_grace_secs, 30);
        assert_eq!(config.queue.lease(), Duration::from_secs(120));
        assert!(!config.encoding.hardware_allowed());
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = Config::from_json("{ nope").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn default_config_warns_about_output_bucket() {
        let warnings = Config::default().validate();
        assert!(warnings.iter().any(|w| w.contains("default_output_bucket")));
    }

    #[test]
    fn unknown_hw_accel_warns() {
        let mut config = Config::default();
        config.worker.default_output_bucket = "out".into();
        config.encoding.hw_accel = "quantum".into();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("quantum"));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("OUTPUT_BUCKET", "processed"),
            ("MAX_CONCURRENT_TASKS", "8"),
            ("POLL_INTERVAL", "5s"),
            ("TEMP_DIR", "/scratch"),
            ("DEBUG_MODE", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.worker.default_output_bucket, "processed");
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.queue.wait_secs, 5);
        assert_eq!(config.worker.temp_dir, PathBuf::from("/scratch"));
        assert!(config.debug);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "MAX_CONCURRENT_TASKS").then(|| "lots".to_string()));
        assert_eq!(config.worker.concurrency, 2);
    }

    #[test]
    fn load_or_default_with_none() {
        let config = Config::load_or_default(None);
        assert_eq!(config.worker.concurrency, 2);
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "worker": { "concurrency": 3 } }"#).unwrap();
        let config = Config::load_or_default(Some(&path));
        assert_eq!(config.worker.concurrency, 3);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let config = Config::load_or_default(Some(Path::new("/nonexistent/config.json")));
        assert_eq!(config.worker.concurrency, 2);
    }
}
