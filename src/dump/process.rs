// dbbackup/src/dump/process.rs
//! Runs native dump/restore tools.
//!
//! stdout and stderr are forwarded line by line into one channel and drained
//! while the child runs, so a chatty tool can never block on a full pipe. The
//! wait is bounded by a wall-clock timeout after which the child is killed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::errors::{AppError, Result};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(3600);

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time allowed for draining output once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One invocation of an external tool.
pub struct ToolCommand {
    program: PathBuf,
    label: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    stdin_file: Option<PathBuf>,
    timeout: Duration,
    on_failure: fn(String) -> AppError,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let label = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            program,
            label,
            args: Vec::new(),
            envs: Vec::new(),
            stdin_file: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            on_failure: AppError::BackupFailed,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Secrets go through the environment, never the argument list.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin_file(mut self, path: &Path) -> Self {
        self.stdin_file = Some(path.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Error variant used for spawn failures, timeouts and non-zero exits.
    pub fn failing_with(mut self, on_failure: fn(String) -> AppError) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Runs the tool to completion and returns its merged output.
    pub async fn run(self) -> Result<String> {
        let fail = self.on_failure;
        let label = self.label.clone();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &self.stdin_file {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    fail(format!("Cannot open {} as input for {label}: {e}", path.display()))
                })?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        tracing::info!(tool = %label, args = ?self.args, "Running external tool");
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut child = command
            .spawn()
            .map_err(|e| fail(format!("Failed to start {label}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| fail(format!("{label}: stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| fail(format!("{label}: stderr was not captured")))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut stdout_task = tokio::spawn(forward_lines(stdout, tx.clone()));
        let mut stderr_task = tokio::spawn(forward_lines(stderr, tx));
        let collector_label = label.clone();
        let mut collector = tokio::spawn(async move {
            let mut merged = String::new();
            while let Some(line) = rx.recv().await {
                tracing::debug!(tool = %collector_label, "{line}");
                merged.push_str(&line);
                merged.push('\n');
            }
            merged
        });

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status.map_err(|e| fail(format!("Failed waiting for {label}: {e}")))?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %label, error = %e, "Failed to kill timed out process");
                }
                stdout_task.abort();
                stderr_task.abort();
                collector.abort();
                tracing::error!(tool = %label, timeout_secs = self.timeout.as_secs(), "External tool timed out");
                return Err(fail(format!(
                    "{label} timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        // A background descendant can inherit the pipes and keep them open
        // after the child itself has exited.
        let drain = async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
            (&mut collector).await.unwrap_or_default()
        };
        let drained = tokio::time::timeout_at(deadline + DRAIN_GRACE, drain).await;
        let output = match drained {
            Ok(output) => output,
            Err(_) => {
                stdout_task.abort();
                stderr_task.abort();
                collector.abort();
                tracing::error!(tool = %label, timeout_secs = self.timeout.as_secs(), "Output of external tool still open after timeout");
                return Err(fail(format!(
                    "{label} timed out after {} seconds: output was still open after the process exited",
                    self.timeout.as_secs()
                )));
            }
        };

        if !status.success() {
            tracing::error!(tool = %label, status = %status, "External tool failed");
            return Err(fail(format!(
                "{label} exited with {status}: {}",
                output.trim()
            )));
        }
        tracing::debug!(tool = %label, "External tool finished");
        Ok(output)
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

/// First line of `<program> --version`, or `unknown`.
pub async fn tool_version(program: &Path) -> String {
    let run = ToolCommand::new(program)
        .arg("--version")
        .timeout(VERSION_TIMEOUT)
        .run()
        .await;
    match run {
        Ok(output) => output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("unknown")
            .to_string(),
        Err(e) => {
            tracing::debug!(tool = %program.display(), error = %e, "Could not determine tool version");
            "unknown".to_string()
        }
    }
}

/// Size of a dump file, failing when the tool left nothing behind.
pub fn ensure_output_file(path: &Path, tool: &str) -> Result<u64> {
    let size = std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|_| {
            AppError::BackupFailed(format!(
                "{tool} reported success but produced no file at {}",
                path.display()
            ))
        })?;
    if size == 0 {
        return Err(AppError::BackupFailed(format!(
            "{tool} produced an empty dump file at {}",
            path.display()
        )));
    }
    Ok(size)
}
