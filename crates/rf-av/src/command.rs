//! Builder for executing external tool commands with timeout and
//! cancellation support.
//!
//! The child is spawned with `kill_on_drop`, so a dropped or cancelled
//! invocation never leaves an orphaned transcoder behind.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Diagnostic lines kept for failure reports.
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Last [`DIAGNOSTIC_TAIL_LINES`] lines of standard error.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use rf_av::ToolCommand;
/// use std::path::PathBuf;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> rf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/narration.wav")
///     .execute(&CancellationToken::new())
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

enum Interrupt {
    Cancelled,
    TimedOut,
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

    /// Short program name used in errors and logs.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and the stderr tail.
    ///
    /// # Errors
    ///
    /// - [`rf_core::Error::Tool`] if spawning fails.
    /// - [`rf_core::Error::TranscodeFailure`] on a non-zero exit, carrying the
    ///   exit code and the last diagnostic lines.
    /// - [`rf_core::Error::TranscodeTimeout`] when the time budget is exceeded.
    /// - [`rf_core::Error::Cancelled`] when `cancel` fires first.
    pub async fn execute(&self, cancel: &CancellationToken) -> rf_core::Result<ToolOutput> {
        self.execute_with_diagnostics(cancel, |_| {}).await
    }

    /// Like [`execute`](Self::execute), but hands every diagnostic line to
    /// `on_line` as it arrives. Carriage returns count as line breaks so
    /// in-place status updates are seen individually.
    pub async fn execute_with_diagnostics(
        &self,
        cancel: &CancellationToken,
        mut on_line: impl FnMut(&str),
    ) -> rf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        if cancel.is_cancelled() {
            return Err(rf_core::Error::Cancelled);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("running {} {}", program_name, self.args.join(" "));

        let mut child = cmd
            .spawn()
            .map_err(|e| rf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stdout = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr = child.stderr.take();

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

        let drained = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = &mut deadline => Err(Interrupt::TimedOut),
            _ = drain_diagnostics(stderr, &mut tail, &mut on_line) => Ok(()),
        };
        if let Err(interrupt) = drained {
            return Err(self.interrupted(&mut child, interrupt).await);
        }

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = &mut deadline => Err(Interrupt::TimedOut),
            status = child.wait() => Ok(status),
        };
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(rf_core::Error::tool(
                    &program_name,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            Err(interrupt) => return Err(self.interrupted(&mut child, interrupt).await),
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let diagnostics = tail.into_iter().collect::<Vec<_>>().join("\n");

        if !status.success() {
            return Err(rf_core::Error::TranscodeFailure {
                tool: program_name,
                exit_code: status.code(),
                diagnostics,
            });
        }

        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: diagnostics,
        })
    }

    async fn interrupted(&self, child: &mut Child, interrupt: Interrupt) -> rf_core::Error {
        let program_name = self.program_name();
        if let Err(e) = child.kill().await {
            tracing::warn!("failed to kill {program_name}: {e}");
        }
        match interrupt {
            Interrupt::Cancelled => {
                tracing::info!("{program_name} cancelled");
                rf_core::Error::Cancelled
            }
            Interrupt::TimedOut => {
                tracing::warn!("{program_name} timed out after {:?}", self.timeout);
                rf_core::Error::TranscodeTimeout {
                    tool: program_name,
                    timeout: self.timeout,
                }
            }
        }
    }
}

/// Read `stream` to EOF, splitting on `\n` and `\r`, keeping the tail.
async fn drain_diagnostics<R: AsyncRead + Unpin>(
    stream: Option<R>,
    tail: &mut VecDeque<String>,
    on_line: &mut impl FnMut(&str),
) {
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) | Err(_) => break,
            Ok(chunk) => chunk,
        };
        let consumed = chunk.len();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                emit_line(&pending, tail, on_line);
                pending.clear();
            } else {
                pending.push(byte);
            }
        }
        reader.consume(consumed);
    }
    emit_line(&pending, tail, on_line);
}

fn emit_line(raw: &[u8], tail: &mut VecDeque<String>, on_line: &mut impl FnMut(&str)) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end();
    if line.is_empty() {
        return;
    }
    on_line(line);
    if tail.len() == DIAGNOSTIC_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

/// Extract the `time=HH:MM:SS.ff` position from a transcoder status line.
///
/// Returns `None` when the line has no marker or the value is not a
/// non-negative timestamp (ffmpeg prints `time=N/A` before the first frame).
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let start = line.rfind("time=")? + "time=".len();
    let value = line[start..].split_whitespace().next()?;
    if value.starts_with('-') {
        return None;
    }

    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Instant;

    #[tokio::test]
    async fn execute_echo() {
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute(&CancellationToken::new())
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute(&CancellationToken::new())
            .await;
        assert_matches!(result, Err(rf_core::Error::Tool { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute(&CancellationToken::new())
            .await;
        assert_matches!(result, Err(rf_core::Error::TranscodeTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .execute(&cancel)
            .await;
        assert_matches!(result, Err(rf_core::Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_cancelled_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute(&cancel)
            .await;
        assert_matches!(result, Err(rf_core::Error::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_code_and_diagnostics() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo first >&2; echo 'Invalid data found' >&2; exit 3"])
            .execute(&CancellationToken::new())
            .await;
        assert_matches!(
            result,
            Err(rf_core::Error::TranscodeFailure { exit_code: Some(3), ref diagnostics, .. })
                if diagnostics.ends_with("Invalid data found")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn diagnostics_tail_is_bounded() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "i=0; while [ $i -lt 100 ]; do echo line$i >&2; i=$((i+1)); done; exit 1"])
            .execute(&CancellationToken::new())
            .await;
        match result {
            Err(rf_core::Error::TranscodeFailure { diagnostics, .. }) => {
                let lines: Vec<&str> = diagnostics.lines().collect();
                assert_eq!(lines.len(), DIAGNOSTIC_TAIL_LINES);
                assert_eq!(lines[0], "line60");
                assert_eq!(lines[DIAGNOSTIC_TAIL_LINES - 1], "line99");
            }
            other => panic!("expected TranscodeFailure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn carriage_returns_split_status_lines() {
        let mut seen = Vec::new();
        ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "printf 'frame=1 time=00:00:01.00\\rframe=2 time=00:00:02.50\\n' >&2"])
            .execute_with_diagnostics(&CancellationToken::new(), |line| {
                seen.push(parse_time_marker(line))
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![Some(1.0), Some(2.5)]);
    }

    #[test]
    fn parse_time_marker_variants() {
        assert_eq!(
            parse_time_marker("frame=  240 fps=60 q=28.0 size=512kB time=00:00:08.00 bitrate=524.3kbits/s"),
            Some(8.0)
        );
        assert_eq!(parse_time_marker("size=1kB time=01:02:03.50 bitrate=N/A"), Some(3723.5));
        assert_eq!(parse_time_marker("size=0kB time=N/A bitrate=N/A"), None);
        assert_eq!(parse_time_marker("time=-00:00:00.03"), None);
        assert_eq!(parse_time_marker("Input #0, image2, from 'a.png':"), None);
    }
}
