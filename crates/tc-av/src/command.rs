//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tc_core::{EncodeFailureKind, Error};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

enum Interrupted {
    TimedOut,
    Cancelled,
}

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use tc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> tc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-encoders")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The command as a single space-joined line, for logs and error
    /// records.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program_name())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`tc_core::Error::Tool`] if spawning fails or the process
    ///   times out.
    /// - Returns [`tc_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes stderr).
    pub async fn execute(&self) -> tc_core::Result<ToolOutput> {
        let output = self.execute_cancellable(&CancellationToken::new()).await?;
        if !output.success() {
            return Err(Error::tool(
                self.program_name(),
                format!(
                    "exited with status {}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output)
    }

    /// Execute the command, killing the child if `cancel` fires or the
    /// timeout expires.
    ///
    /// A non-zero exit is *not* an error here: the caller gets the output
    /// and decides. Errors are reserved for runs that produced no usable
    /// result.
    ///
    /// # Errors
    ///
    /// - [`tc_core::Error::Tool`] if spawning or waiting fails, or on timeout.
    /// - [`tc_core::Error::Encode`] with [`EncodeFailureKind::Cancelled`] if
    ///   the token fired and the child was killed.
    pub async fn execute_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> tc_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe while we wait for it.
        let stdout = child.stdout.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = tokio::select! {
            status = child.wait() => Ok(status),
            _ = tokio::time::sleep(self.timeout) => Err(Interrupted::TimedOut),
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        };
        let status = match waited {
            Ok(status) => status.map_err(|e| {
                Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
            Err(reason) => {
                let _ = child.kill().await;
                return Err(match reason {
                    Interrupted::TimedOut => Error::tool(
                        program_name,
                        format!("timed out after {:?}", self.timeout),
                    ),
                    Interrupted::Cancelled => {
                        tracing::info!(tool = %program_name, "Killed process on cancellation");
                        Error::encode(
                            EncodeFailureKind::Cancelled,
                            format!("{program_name} killed after {:?}", started.elapsed()),
                        )
                    }
                });
            }
        };
        let duration = started.elapsed();

        let stdout = match stdout {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration,
        })
    }
}
