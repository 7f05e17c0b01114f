//! Subprocess Adapter: runs a command with a timeout, a captured-stdout byte
//! cap, and an `allow_stdout_on_error` escape hatch for tools (git) that
//! print useful partial output on certain non-zero exits.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use super::errors::CoreError;

/// Options for a single subprocess invocation.
#[derive(Debug, Clone)]
pub struct SubprocessOptions {
    /// Kill the process and return a timeout error if it runs longer than this.
    pub timeout: Duration,
    /// Maximum number of captured stdout bytes; output beyond this is discarded.
    pub stdout_cap_bytes: usize,
    /// When `true`, a non-zero exit with non-empty stdout is treated as success.
    pub allow_stdout_on_error: bool,
}

impl Default for SubprocessOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            stdout_cap_bytes: 20 * 1024 * 1024,
            allow_stdout_on_error: false,
        }
    }
}

/// Result of a successful (or `allow_stdout_on_error`-rescued) invocation.
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    /// Captured stdout, truncated to `stdout_cap_bytes` if necessary.
    pub stdout: String,
    /// Captured stderr, for diagnostics.
    pub stderr: String,
    /// The process's exit code, if it exited normally.
    pub exit_code: Option<i32>,
}

/// Runs external commands (git, the multiplexer CLI, `codex app-server`)
/// under a uniform timeout/cap/recovery contract. Never inherits the
/// caller's stdin.
#[derive(Debug, Clone, Default)]
pub struct SubprocessAdapter;

impl SubprocessAdapter {
    /// Construct an adapter. Stateless; cheap to clone and share.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run `program` with `args` and `options`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UpstreamUnavailable`] if the process cannot be
    /// spawned, times out, or exits non-zero with empty/disallowed stdout.
    #[tracing::instrument(skip(self, options), fields(program = %program))]
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&std::path::Path>,
        options: &SubprocessOptions,
    ) -> Result<SubprocessOutput, CoreError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            tracing::warn!(error = %e, "failed to spawn subprocess");
            CoreError::UpstreamUnavailable {
                reason: format!("failed to spawn {program}: {e}"),
            }
        })?;

        let run = Self::read_to_completion(&mut child, options.stdout_cap_bytes);
        let result = match tokio::time::timeout(options.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                Self::kill(&mut child).await;
                tracing::warn!(program = %program, "subprocess timed out");
                return Err(CoreError::UpstreamUnavailable {
                    reason: format!("{program} timed out after {:?}", options.timeout),
                });
            }
        };

        let (stdout, stderr) = result.map_err(|e| CoreError::UpstreamUnavailable {
            reason: format!("failed reading {program} output: {e}"),
        })?;

        let status = child.wait().await.map_err(|e| CoreError::UpstreamUnavailable {
            reason: format!("failed waiting for {program}: {e}"),
        })?;

        if status.success() {
            return Ok(SubprocessOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            });
        }

        if options.allow_stdout_on_error && !stdout.is_empty() {
            tracing::debug!(
                program = %program,
                exit_code = ?status.code(),
                "non-zero exit with usable stdout, treating as success"
            );
            return Ok(SubprocessOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            });
        }

        tracing::warn!(
            program = %program,
            exit_code = ?status.code(),
            stderr = %stderr,
            "subprocess exited non-zero"
        );
        Err(CoreError::UpstreamUnavailable {
            reason: if stderr.is_empty() {
                format!("{program} exited with {:?}", status.code())
            } else {
                stderr
            },
        })
    }

    async fn read_to_completion(
        child: &mut Child,
        stdout_cap_bytes: usize,
    ) -> std::io::Result<(String, String)> {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        if let Some(mut stdout) = child.stdout.take() {
            let mut limited = (&mut stdout).take(stdout_cap_bytes as u64);
            limited.read_to_end(&mut stdout_buf).await?;
        }
        if let Some(mut stderr) = child.stderr.take() {
            stderr.read_to_end(&mut stderr_buf).await?;
        }

        Ok((
            String::from_utf8_lossy(&stdout_buf).into_owned(),
            String::from_utf8_lossy(&stderr_buf).into_owned(),
        ))
    }

    async fn kill(child: &mut Child) {
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "failed to kill timed-out subprocess");
        }
        let _ = child.wait().await;
    }

    /// Write `data` to the process's stdin and close it, without reading any
    /// output. Used by interactive multiplexer transports that open stdin
    /// themselves; the default adapter invocation above always nulls stdin.
    pub async fn write_stdin_and_close(
        &self,
        program: &str,
        args: &[&str],
        data: &[u8],
    ) -> Result<(), CoreError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CoreError::UpstreamUnavailable {
                reason: format!("failed to spawn {program}: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(data)
                .await
                .map_err(|e| CoreError::UpstreamUnavailable {
                    reason: format!("failed writing to {program} stdin: {e}"),
                })?;
        }

        child
            .wait()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                reason: format!("failed waiting for {program}: {e}"),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let adapter = SubprocessAdapter::new();
        let output = adapter
            .run("echo", &["hello"], None, &SubprocessOptions::default())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_without_flag_errors() {
        let adapter = SubprocessAdapter::new();
        let result = adapter
            .run("sh", &["-c", "exit 1"], None, &SubprocessOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn allow_stdout_on_error_rescues_nonzero_exit() {
        let adapter = SubprocessAdapter::new();
        let options = SubprocessOptions {
            allow_stdout_on_error: true,
            ..Default::default()
        };
        let output = adapter
            .run("sh", &["-c", "echo partial; exit 1"], None, &options)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "partial");
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let adapter = SubprocessAdapter::new();
        let options = SubprocessOptions {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let result = adapter.run("sleep", &["5"], None, &options).await;
        assert!(matches!(result, Err(CoreError::UpstreamUnavailable { .. })));
    }
}
