//! Orchestration request definitions and loading.
//!
//! Requests are submitted over HTTP as JSON or loaded from YAML files via
//! the CLI. A request is immutable after submission.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;

/// A complete orchestration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    /// Unique request identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Tenant this orchestration belongs to (partitions persistence)
    pub tenant_id: String,

    /// Ordered list of tasks to execute
    pub tasks: Vec<Task>,

    /// Dependency map: task id -> prerequisite task ids
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<String>>,

    /// Review criteria to gate the aggregate response with
    pub criteria_id: String,

    /// Default per-task timeout in milliseconds (tasks may override).
    /// When omitted, the engine's configured default is applied at
    /// submission; [`DEFAULT_TASK_TIMEOUT_MS`] is the last resort.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,

    /// Merge strategy for the result aggregator
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: String,

    /// What to do when the review gate rejects the response
    #[serde(default)]
    pub reject_action: RejectAction,

    /// When the request was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Who created the request
    #[serde(default)]
    pub created_by: String,
}

/// Fallback per-task timeout when neither the request nor the engine
/// configuration provides one
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;

fn default_merge_strategy() -> String {
    "keyed".to_string()
}

impl OrchestrationRequest {
    /// Load a request from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse a request from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse request YAML")
    }

    /// Validate the request shape before any task executes.
    ///
    /// Checks task id uniqueness and that the dependency map references
    /// only submitted task ids. Acyclicity is checked by DependencyGraph.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.tenant_id.is_empty() {
            return Err(ConfigurationError::MalformedRequest(
                "tenant_id cannot be empty".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if task.id.is_empty() {
                return Err(ConfigurationError::MalformedRequest(
                    "task id cannot be empty".to_string(),
                ));
            }
            // The keyed aggregator writes the metrics union under this key
            if task.id == "metrics" {
                return Err(ConfigurationError::MalformedRequest(
                    "task id 'metrics' is reserved for the aggregated metrics union".to_string(),
                ));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ConfigurationError::DuplicateTask {
                    task_id: task.id.clone(),
                });
            }
        }

        for (task_id, prereqs) in &self.dependencies {
            if !seen.contains(task_id.as_str()) {
                return Err(ConfigurationError::UnknownTask {
                    task_id: task_id.clone(),
                });
            }
            for prereq in prereqs {
                if !seen.contains(prereq.as_str()) {
                    return Err(ConfigurationError::UnknownTask {
                        task_id: prereq.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get a task by id
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Effective request-level timeout default for tasks without an
    /// override
    pub fn default_task_timeout(&self) -> u64 {
        self.task_timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS)
    }
}

/// A single task within an orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id (unique within the request)
    pub id: String,

    /// Executor name resolved through the executor registry
    pub executor: String,

    /// Opaque input parameters passed to the executor
    #[serde(default)]
    pub input: serde_json::Value,

    /// Override timeout for this task in milliseconds
    /// (uses the request-level task_timeout_ms if not set)
    pub timeout_ms: Option<u64>,

    /// Retry policy for this task
    #[serde(default)]
    pub retry: RetryConfig,

    /// Advisory schema describing the expected output shape
    pub output_schema: Option<serde_json::Value>,
}

impl Task {
    /// Get the effective timeout for this task
    pub fn timeout(&self, request_default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(request_default_ms))
    }
}

/// Retry policy configuration for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Whether failed attempts are retried at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of attempts (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff strategy between attempts
    #[serde(default)]
    pub backoff: Backoff,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Whether a timed-out attempt is retried like a failure.
    /// Off by default: the executor call may still be running remotely.
    #[serde(default)]
    pub retry_on_timeout: bool,
}

fn default_enabled() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            retry_on_timeout: false,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before attempt `attempt` (1-indexed; no delay before
    /// the first attempt).
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let delay = match self.backoff {
            Backoff::Exponential => {
                let factor = 2u64.saturating_pow(attempt - 2);
                self.initial_delay_ms.saturating_mul(factor)
            }
            Backoff::Linear => self.initial_delay_ms.saturating_mul((attempt - 1) as u64),
        };
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether another attempt is allowed after `attempt` attempts
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }
}

/// Backoff strategy between retry attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Exponential,
    Linear,
}

/// Configured consequence of a review rejection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectAction {
    /// Re-run from the scheduler stage, bounded by the review retry ceiling
    Retry,

    /// Flag for human follow-up, no re-execution
    #[default]
    Escalate,

    /// Surface the rejection as a terminal failure to the caller
    Error,
}
