//! Retry driver for individual task attempts.
//!
//! Wraps one task's attempt function with bounded retries and backoff.
//! A timed-out attempt is terminal unless the task opts in to
//! `retry_on_timeout`; cancellation is always terminal.

use std::future::Future;

use chrono::Utc;
use tracing::warn;

use crate::domain::{RetryConfig, TaskResult, TaskStatus};
use crate::executors::ExecutorError;

/// Drives attempts of a single task under its retry configuration
pub struct RetryPolicy;

impl RetryPolicy {
    /// Run `attempt` until it succeeds, exhausts its attempts, or hits a
    /// non-retryable condition. The final status reflects the last attempt;
    /// `retry_count` is the number of retries performed.
    pub async fn execute<F, Fut>(
        task_id: &str,
        config: &RetryConfig,
        mut attempt: F,
    ) -> TaskResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<serde_json::Value, ExecutorError>>,
    {
        let started_at = Utc::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let delay = config.delay_before_attempt(attempts);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match attempt(attempts).await {
                Ok(output) => {
                    return TaskResult {
                        task_id: task_id.to_string(),
                        status: TaskStatus::Success,
                        output: Some(output),
                        error: None,
                        started_at: Some(started_at),
                        completed_at: Some(Utc::now()),
                        retry_count: attempts - 1,
                    };
                }
                Err(ExecutorError::Failed(reason)) => {
                    if config.should_retry(attempts) {
                        warn!(
                            task_id,
                            attempt = attempts,
                            error = %reason,
                            "Task attempt failed, retrying"
                        );
                        continue;
                    }
                    return terminal(task_id, TaskStatus::Failed, reason, started_at, attempts);
                }
                Err(ExecutorError::TimedOut(timeout)) => {
                    let reason = format!("Attempt timed out after {:?}", timeout);
                    if config.retry_on_timeout && config.should_retry(attempts) {
                        warn!(
                            task_id,
                            attempt = attempts,
                            "Task attempt timed out, retrying (retry_on_timeout)"
                        );
                        continue;
                    }
                    return terminal(task_id, TaskStatus::TimedOut, reason, started_at, attempts);
                }
                Err(ExecutorError::Cancelled) => {
                    return terminal(
                        task_id,
                        TaskStatus::Failed,
                        "Cancelled".to_string(),
                        started_at,
                        attempts,
                    );
                }
            }
        }
    }
}

fn terminal(
    task_id: &str,
    status: TaskStatus,
    error: String,
    started_at: chrono::DateTime<Utc>,
    attempts: u32,
) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        status,
        output: None,
        error: Some(error),
        started_at: Some(started_at),
        completed_at: Some(Utc::now()),
        retry_count: attempts.saturating_sub(1),
    }
}
