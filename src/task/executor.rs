// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process execution for tasks.
//!
//! Workers hand each task to a [`ProcessExecutor`] once a workspace is ready. The default
//! [`CommandExecutor`] spawns a configured program inside the workspace; tests plug in fakes.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;

/// Bytes of stdout/stderr kept in task results.
pub const OUTPUT_TAIL_BYTES: usize = 4096;

/// Everything the executor needs to run one task.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task_id: String,
    /// Isolated workspace to run in.
    pub workspace: PathBuf,
    /// The caller's original project.
    pub project_path: PathBuf,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub context: Map<String, Value>,
}

impl Invocation {
    /// `[command] + args`, the argument vector passed after the executor's defaults.
    pub fn argv(&self) -> Vec<String> {
        self.command
            .iter()
            .filter(|c| !c.is_empty())
            .cloned()
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Errors from running a task's process.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to launch {program}: {message}")]
    LaunchFailed { program: String, message: String },

    #[error("Process exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the coding agent for a task.
///
/// Implementations must return promptly once `cancel` fires.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

/// Spawns `program [default_args..] [command] [args..]` in the workspace.
pub struct CommandExecutor {
    program: String,
    default_args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            default_args: Vec::new(),
        }
    }

    pub fn with_default_args(mut self, args: Vec<String>) -> Self {
        self.default_args = args;
        self
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.program.clone()).with_default_args(config.default_args.clone())
    }
}

/// Keep the last `limit` bytes of process output, starting on a char boundary.
fn tail(bytes: &[u8], limit: usize) -> String {
    let mut start = bytes.len().saturating_sub(limit);
    while start < bytes.len() && bytes[start] & 0xC0 == 0x80 {
        start += 1;
    }
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Drain a pipe to its end, holding on to at most the last `limit` bytes.
async fn read_tail<R>(pipe: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::with_capacity(limit);
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept);
        }
        kept.extend_from_slice(&chunk[..n]);
        if kept.len() > limit {
            kept.drain(..kept.len() - limit);
        }
    }
}

#[async_trait]
impl ProcessExecutor for CommandExecutor {
    async fn execute(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutorError> {
        let context = serde_json::to_string(&invocation.context).unwrap_or_default();
        let mut command = Command::new(&self.program);
        command
            .args(&self.default_args)
            .args(invocation.argv())
            .current_dir(&invocation.workspace)
            .env("DISPATCH_TASK_ID", &invocation.task_id)
            .env("DISPATCH_PROJECT_PATH", &invocation.project_path)
            .env("DISPATCH_TASK_CONTEXT", context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ExecutorError::LaunchFailed {
            program: self.program.clone(),
            message: e.to_string(),
        })?;
        debug!(task_id = %invocation.task_id, pid = ?child.id(), "Executor process spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = async {
            let (stdout, stderr, status) = tokio::join!(
                read_tail(stdout, OUTPUT_TAIL_BYTES),
                read_tail(stderr, OUTPUT_TAIL_BYTES),
                child.wait(),
            );
            Ok::<_, std::io::Error>((stdout?, stderr?, status?))
        };

        // The child is killed when it is dropped on return.
        let (stdout, stderr, status) = tokio::select! {
            finished = finished => finished?,
            _ = cancel.cancelled() => {
                debug!(task_id = %invocation.task_id, "Killing executor process");
                return Err(ExecutorError::Cancelled);
            }
        };

        let result = ExecutionOutput {
            exit_code: status.code(),
            stdout: tail(&stdout, OUTPUT_TAIL_BYTES),
            stderr: tail(&stderr, OUTPUT_TAIL_BYTES),
        };

        if status.success() {
            Ok(result)
        } else {
            warn!(
                task_id = %invocation.task_id,
                code = ?result.exit_code,
                "Executor process exited unsuccessfully"
            );
            Err(ExecutorError::NonZeroExit {
                code: result.exit_code,
                stderr: result.stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn invocation(dir: &TempDir, command: Option<&str>, args: &[&str]) -> Invocation {
        Invocation {
            task_id: "task_test".to_string(),
            workspace: dir.path().to_path_buf(),
            project_path: dir.path().to_path_buf(),
            command: command.map(str::to_string),
            args: args.iter().map(|a| a.to_string()).collect(),
            context: Map::new(),
        }
    }

    #[test]
    fn test_argv_prepends_command() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            invocation(&dir, Some("fix"), &["--all"]).argv(),
            vec!["fix".to_string(), "--all".to_string()]
        );
        assert_eq!(invocation(&dir, Some(""), &["x"]).argv(), vec!["x".to_string()]);
    }

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail(b"short", 10), "short");
        assert_eq!(tail(b"0123456789", 4), "6789");
        // Multi-byte character straddling the cut is dropped whole.
        assert_eq!(tail("aé".as_bytes(), 1), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new("sh").with_default_args(vec!["-c".to_string()]);
        let output = executor
            .execute(
                invocation(&dir, Some("pwd; echo $DISPATCH_TASK_ID"), &[]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.contains("task_test"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_output_keeps_only_tail() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new("sh").with_default_args(vec!["-c".to_string()]);
        let output = executor
            .execute(
                invocation(&dir, Some("head -c 1000000 /dev/zero | tr '\\0' a; echo END"), &[]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.stdout.len(), OUTPUT_TAIL_BYTES);
        assert!(output.stdout.ends_with("aEND\n"));
    }

    #[tokio::test]
    async fn test_read_tail_bounds_buffer() {
        let data = vec![b'x'; 50_000];
        let kept = read_tail(Some(&data[..]), 100).await.unwrap();
        assert_eq!(kept.len(), 100);
        assert!(read_tail(None::<&[u8]>, 100).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new("sh").with_default_args(vec!["-c".to_string()]);
        let err = executor
            .execute(
                invocation(&dir, Some("echo boom >&2; exit 3"), &[]),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            ExecutorError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new("sleep");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = executor
            .execute(invocation(&dir, Some("30"), &[]), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_launch() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new("dispatch-no-such-program");
        let err = executor
            .execute(invocation(&dir, None, &[]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::LaunchFailed { .. }));
    }
}
