//! Subprocess executor.
//!
//! Runs a configured binary with the task input piped to stdin as JSON and
//! reads the result from stdout. Output that parses as JSON is passed
//! through structurally; anything else is wrapped as `{"text": ...}`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::{ExecutorError, TaskExecutor};

/// Executor that delegates to an external command
pub struct CommandExecutor {
    /// Name this executor is registered under
    name: String,

    /// Binary to spawn
    binary_path: String,

    /// Fixed arguments passed before the input
    args: Vec<String>,
}

impl CommandExecutor {
    /// Create a command executor registered under `name`
    pub fn new(name: impl Into<String>, binary_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary_path: binary_path.into(),
            args: Vec::new(),
        }
    }

    /// Add fixed arguments to the spawned command
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    async fn run_subprocess(
        &self,
        input: &serde_json::Value,
        attempt_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, ExecutorError> {
        let mut child = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutorError::Failed(format!(
                    "Failed to spawn '{}': {}",
                    self.binary_path, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(input)
                .map_err(|e| ExecutorError::Failed(format!("Failed to encode input: {}", e)))?;
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| ExecutorError::Failed(format!("Failed to write stdin: {}", e)))?;
            // Drop stdin to signal EOF
        }

        let wait = child.wait_with_output();
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            result = timeout(attempt_timeout, wait) => result
                .map_err(|_| ExecutorError::TimedOut(attempt_timeout))?
                .map_err(|e| ExecutorError::Failed(format!("Failed to wait for command: {}", e)))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ExecutorError::Failed(format!(
                "Command '{}' failed with exit code {}: {}",
                self.binary_path,
                exit_code,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| ExecutorError::Failed("Command output is not valid UTF-8".to_string()))
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        input: &serde_json::Value,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ExecutorError> {
        let stdout = self.run_subprocess(input, timeout, cancel).await?;
        let trimmed = stdout.trim();

        match serde_json::from_str(trimmed) {
            Ok(value) => Ok(value),
            Err(_) => Ok(serde_json::json!({ "text": trimmed })),
        }
    }
}
