//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How many trailing stderr lines to keep from a streamed execution.
const STDERR_TAIL_LINES: usize = 40;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// Output from a streamed execution.
///
/// Unlike [`ToolOutput`], a non-zero exit is reported here rather than as an
/// error, since for encodes the caller wants the status plus the stderr tail
/// to build its own failure report.
#[derive(Debug, Clone)]
pub struct StreamOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Last lines of standard error, oldest first.
    pub stderr_tail: Vec<String>,
}

impl StreamOutput {
    /// The stderr tail joined into one message, trimmed.
    pub fn stderr_summary(&self) -> String {
        self.stderr_tail.join("\n").trim().to_string()
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use wf_engine::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> wf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("-show_streams")
///     .arg("/path/to/track.wav")
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

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`wf_core::Error::Tool`] if the process times out (message
    ///   includes the timeout duration).
    /// - Returns [`wf_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes stderr).
    /// - Returns [`wf_core::Error::Tool`] if spawning the process fails.
    pub async fn execute(&self) -> wf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());

        let child = cmd.spawn().map_err(|e| wf_core::Error::Tool {
            tool: program_name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(wf_core::Error::Tool {
                        tool: program_name,
                        message: format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    });
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(wf_core::Error::Tool {
                tool: program_name,
                message: format!("I/O error waiting for process: {e}"),
            }),
            Err(_elapsed) => Err(wf_core::Error::Tool {
                tool: program_name,
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }

    /// Execute the command, streaming stderr line-by-line to `on_line`.
    ///
    /// The timeout here is a *stall* timeout: it applies between consecutive
    /// stderr lines, not to total runtime, so a long encode that keeps
    /// emitting progress is never killed. If no line arrives within the
    /// window the process is killed and a [`wf_core::Error::Tool`] error is
    /// returned.
    ///
    /// A non-zero exit is NOT an error; the caller inspects
    /// [`StreamOutput::status`] and the stderr tail.
    pub async fn execute_streaming(
        &self,
        on_line: &(dyn Fn(&str) + Send + Sync),
    ) -> wf_core::Result<StreamOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| wf_core::Error::Tool {
            tool: program_name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        let stderr = child.stderr.take().ok_or_else(|| wf_core::Error::Tool {
            tool: program_name.clone(),
            message: "failed to capture stderr".into(),
        })?;

        let mut lines = BufReader::new(stderr).lines();
        let mut tail: std::collections::VecDeque<String> =
            std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);

        loop {
            match tokio::time::timeout(self.timeout, lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    on_line(&line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    let _ = child.kill().await;
                    return Err(wf_core::Error::Tool {
                        tool: program_name,
                        message: format!("I/O error reading stderr: {e}"),
                    });
                }
                Err(_elapsed) => {
                    let _ = child.kill().await;
                    return Err(wf_core::Error::Tool {
                        tool: program_name,
                        message: format!("stalled: no output for {:?}", self.timeout),
                    });
                }
            }
        }

        let status = child.wait().await.map_err(|e| wf_core::Error::Tool {
            tool: program_name,
            message: format!("I/O error waiting for process: {e}"),
        })?;

        Ok(StreamOutput {
            status,
            stderr_tail: tail.into_iter().collect(),
        })
    }
}
