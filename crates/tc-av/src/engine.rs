//! The execution engine: runs one profile for one input, falling back to
//! software once if the hardware encoder fails.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tc_core::config::EncodingConfig;
use tc_core::{EncodeFailureKind, Error, Profile};
use tokio_util::sync::CancellationToken;

use crate::builder::{build_args, raw_args};
use crate::command::ToolCommand;
use crate::platform::{CapabilitySnapshot, Platform, PlatformCapabilities};
use crate::profiles::ProfileRegistry;

/// A successful encoder run.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub command: String,
    /// Combined stdout and stderr.
    pub output: String,
    pub duration: Duration,
    /// Conventions the successful attempt was built with.
    pub platform: Platform,
    /// A hardware attempt failed first and this is the software retry.
    pub software_fallback: bool,
}

/// A failed encoder run, with what is needed to record it.
#[derive(Debug, Clone)]
pub struct EncodeFailure {
    pub kind: EncodeFailureKind,
    pub message: String,
    pub command: String,
    pub output: String,
    pub duration: Duration,
}

impl EncodeFailure {
    fn other(message: impl Into<String>) -> Self {
        Self {
            kind: EncodeFailureKind::Other,
            message: message.into(),
            command: String::new(),
            output: String::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == EncodeFailureKind::Cancelled
    }
}

impl fmt::Display for EncodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl From<EncodeFailure> for Error {
    fn from(failure: EncodeFailure) -> Self {
        Error::encode(failure.kind, failure.message)
    }
}

/// Shared by all workers.
pub struct ExecutionEngine {
    capabilities: Arc<PlatformCapabilities>,
    profiles: Arc<ProfileRegistry>,
    ffmpeg: PathBuf,
    timeout: Duration,
    temp_dir: PathBuf,
    sample_input: Option<PathBuf>,
}

impl ExecutionEngine {
    pub fn new(
        capabilities: Arc<PlatformCapabilities>,
        profiles: Arc<ProfileRegistry>,
        ffmpeg: PathBuf,
        encoding: &EncodingConfig,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            capabilities,
            profiles,
            ffmpeg,
            timeout: encoding.timeout(),
            temp_dir,
            sample_input: encoding.sample_input.clone(),
        }
    }

    pub fn capabilities(&self) -> &PlatformCapabilities {
        &self.capabilities
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Encode `input` to `output` with `profile`.
    ///
    /// A failure that blames the hardware encoder downgrades the shared
    /// capability flag and is retried exactly once on the software path.
    /// When `cancel` fires the encoder is killed and any partial output is
    /// removed.
    pub async fn transcode(
        &self,
        profile: &Profile,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<EncodeReport, EncodeFailure> {
        let snapshot = self.capabilities.snapshot();
        let first = self
            .run_attempt(build_args(profile, &snapshot, input, output), &snapshot, cancel)
            .await;

        let result = match first {
            Err(failure) if failure.kind == EncodeFailureKind::Hardware => {
                self.capabilities.downgrade(&snapshot);
                tracing::warn!(
                    profile = %profile.name,
                    error = %failure.message,
                    "Hardware encode failed; retrying with software encoder"
                );
                remove_partial(output).await;

                let software = CapabilitySnapshot {
                    hardware: false,
                    ..snapshot
                };
                self.run_attempt(build_args(profile, &software, input, output), &software, cancel)
                    .await
                    .map(|report| EncodeReport {
                        software_fallback: true,
                        ..report
                    })
            }
            other => other,
        };

        if let Err(failure) = &result {
            if failure.is_cancelled() {
                remove_partial(output).await;
            }
        }
        result
    }

    /// Run caller-supplied encoder parameters against a known-good sample.
    ///
    /// `input` overrides the configured sample. The output goes to the temp
    /// directory and is removed again when the run succeeds.
    pub async fn test_encode(
        &self,
        input: Option<&Path>,
        params: &[String],
        extension: &str,
    ) -> Result<EncodeReport, EncodeFailure> {
        let Some(input) = input.or(self.sample_input.as_deref()) else {
            return Err(EncodeFailure::other("no sample input configured"));
        };
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".into());
        let output = self.temp_dir.join(format!(
            "{stem}_test_{}.{extension}",
            chrono::Utc::now().timestamp()
        ));

        let snapshot = self.capabilities.snapshot();
        let result = self
            .run_attempt(
                raw_args(params, &snapshot, input, &output),
                &snapshot,
                &CancellationToken::new(),
            )
            .await;
        if result.is_ok() {
            remove_partial(&output).await;
        }
        result
    }

    /// One encoder process for an already built argument list.
    async fn run_attempt(
        &self,
        args: Vec<String>,
        snapshot: &CapabilitySnapshot,
        cancel: &CancellationToken,
    ) -> Result<EncodeReport, EncodeFailure> {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(args).timeout(self.timeout);
        let command = cmd.command_line();
        tracing::debug!(command = %command, hardware = snapshot.hardware, "Running encoder");

        let started = std::time::Instant::now();
        match cmd.execute_cancellable(cancel).await {
            Ok(out) if out.success() => {
                tracing::info!(
                    platform = %snapshot.effective(),
                    duration_ms = out.duration.as_millis() as u64,
                    "Encode finished"
                );
                Ok(EncodeReport {
                    command,
                    output: out.combined(),
                    duration: out.duration,
                    platform: snapshot.effective(),
                    software_fallback: false,
                })
            }
            Ok(out) => {
                let output = out.combined();
                let kind = if snapshot.is_hardware_failure(&output) {
                    EncodeFailureKind::Hardware
                } else {
                    EncodeFailureKind::Other
                };
                Err(EncodeFailure {
                    kind,
                    message: format!("ffmpeg exited with status {}", out.status),
                    command,
                    output,
                    duration: out.duration,
                })
            }
            Err(Error::Encode { kind, message }) => Err(EncodeFailure {
                kind,
                message,
                command,
                output: String::new(),
                duration: started.elapsed(),
            }),
            Err(e) => Err(EncodeFailure {
                kind: EncodeFailureKind::Other,
                message: e.to_string(),
                command,
                output: String::new(),
                duration: started.elapsed(),
            }),
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed encoder output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove encoder output"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Fake ffmpeg: writes its last argument as the output file, except that
    /// any NVENC request fails with an NVENC error.
    const FLAKY_GPU: &str = r#"for a; do last="$a"; done
case "$*" in
  *hevc_nvenc*) echo "[hevc_nvenc @ 0x1] OpenEncodeSessionEx failed: NVENC unsupported device" >&2; exit 1;;
esac
echo encoded > "$last"
exit 0"#;

    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn engine(dir: &Path, body: &str, platform: Platform) -> ExecutionEngine {
        let encoding = EncodingConfig {
            sample_input: Some(dir.join("sample.mp4")),
            ..EncodingConfig::default()
        };
        ExecutionEngine::new(
            Arc::new(PlatformCapabilities::new(platform)),
            Arc::new(ProfileRegistry::builtin()),
            fake_ffmpeg(dir, body),
            &encoding,
            dir.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn hardware_failure_falls_back_to_software_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), FLAKY_GPU, Platform::LinuxNvidia);
        let profile = engine.profiles().get("mp4_standard").unwrap().clone();
        let output = dir.path().join("out.mp4");

        let report = engine
            .transcode(&profile, Path::new("in.mov"), &output, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.software_fallback);
        assert_eq!(report.platform, Platform::Cpu);
        assert!(report.command.contains("libx265"));
        assert!(output.exists());
        assert!(!engine.capabilities().hardware_usable());

        // Later runs start on software directly.
        let again = engine
            .transcode(&profile, Path::new("in.mov"), &output, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!again.software_fallback);
        assert!(again.command.contains("-crf 23"));
    }

    #[tokio::test]
    async fn ordinary_failure_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(
            dir.path(),
            "echo 'in.mov: No such file or directory' >&2; exit 1",
            Platform::LinuxNvidia,
        );
        let profile = engine.profiles().get("thumbnail").unwrap().clone();

        let failure = engine
            .transcode(
                &profile,
                Path::new("in.mov"),
                &dir.path().join("t.jpg"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.kind, EncodeFailureKind::Other);
        assert!(failure.output.contains("No such file"));
        assert!(failure.command.starts_with("ffmpeg -hwaccel cuda"));
        assert!(engine.capabilities().hardware_usable());
    }

    #[tokio::test]
    async fn software_failure_mentioning_markers_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), "echo 'cuda? nvenc?' >&2; exit 1", Platform::Cpu);
        let profile = engine.profiles().get("mp4_smooth").unwrap().clone();

        let failure = engine
            .transcode(
                &profile,
                Path::new("in.mov"),
                &dir.path().join("o.mp4"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind, EncodeFailureKind::Other);
    }

    #[tokio::test]
    async fn cancellation_kills_and_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(
            dir.path(),
            r#"for a; do last="$a"; done
echo partial > "$last"
exec sleep 10"#,
            Platform::Cpu,
        );
        let profile = engine.profiles().get("mp4_standard").unwrap().clone();
        let output = dir.path().join("o.mp4");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let failure = engine
            .transcode(&profile, Path::new("in.mov"), &output, &cancel)
            .await
            .unwrap_err();
        assert!(failure.is_cancelled());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_encode_uses_sample_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), FLAKY_GPU, Platform::Cpu);
        let params = vec!["-c:v".to_string(), "libx264".to_string()];

        let report = engine.test_encode(None, &params, "mp4").await.unwrap();
        assert!(report.command.contains("sample.mp4"));
        assert!(report.command.contains("-c:v libx264"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_test_"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
