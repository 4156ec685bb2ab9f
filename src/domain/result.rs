//! Execution results and timeline tracking.
//!
//! A TaskResult has exactly one writer (the task's own execution path) and
//! is terminal once its status leaves Pending/Running. Timeline entries are
//! write-once per task.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::review::ReviewDecision;

/// Lifecycle status of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    TimedOut,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// Outcome of one task's execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,

    /// Output produced on success
    pub output: Option<serde_json::Value>,

    /// Error message on failure or timeout
    pub error: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of retries performed (attempts - 1)
    pub retry_count: u32,
}

impl TaskResult {
    /// A successful result with output
    pub fn success(task_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    /// A failed result with an error message
    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output: None,
            error: Some(error.into()),
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    /// A failure recorded for a task that was never executed because an
    /// upstream prerequisite failed or timed out
    pub fn upstream_failure(task_id: impl Into<String>, upstream: &str) -> Self {
        Self::failed(
            task_id,
            format!("UpstreamFailure: prerequisite '{}' did not succeed", upstream),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Timing for a single task within the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Per-task timestamps plus the overall workflow span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTimeline {
    pub tasks: HashMap<String, TaskTiming>,
    pub workflow_started_at: DateTime<Utc>,
    pub workflow_completed_at: Option<DateTime<Utc>>,
}

impl ExecutionTimeline {
    /// Start a new timeline
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            workflow_started_at: Utc::now(),
            workflow_completed_at: None,
        }
    }

    /// Record a task as queued (entering its wave)
    pub fn record_queued(&mut self, task_id: &str) {
        self.tasks.entry(task_id.to_string()).or_insert(TaskTiming {
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        });
    }

    /// Record a task's first attempt starting
    pub fn record_started(&mut self, task_id: &str) {
        if let Some(timing) = self.tasks.get_mut(task_id) {
            if timing.started_at.is_none() {
                timing.started_at = Some(Utc::now());
            }
        }
    }

    /// Record a task reaching a terminal state
    pub fn record_completed(&mut self, task_id: &str) {
        if let Some(timing) = self.tasks.get_mut(task_id) {
            if timing.completed_at.is_none() {
                let now = Utc::now();
                timing.completed_at = Some(now);
                let base = timing.started_at.unwrap_or(timing.queued_at);
                timing.duration_ms = Some((now - base).num_milliseconds().max(0) as u64);
            }
        }
    }

    /// Close the workflow span
    pub fn finish(&mut self) {
        self.workflow_completed_at = Some(Utc::now());
    }

    /// Total workflow duration in milliseconds, if finished
    pub fn total_duration_ms(&self) -> Option<u64> {
        self.workflow_completed_at
            .map(|end| (end - self.workflow_started_at).num_milliseconds().max(0) as u64)
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum OrchestrationState {
    Submitted,
    Scheduling,
    Executing,
    Aggregating,
    Reviewing,
    Approved,
    Rejected,
    Retrying,
    Escalated,
    Errored { error: String },
    Completed,
}

/// Terminal artifact returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub orchestration_id: Uuid,
    pub request_id: Uuid,
    pub task_results: HashMap<String, TaskResult>,
    pub timeline: ExecutionTimeline,
    pub decision: ReviewDecision,
    pub total_duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}
