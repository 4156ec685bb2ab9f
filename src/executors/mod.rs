//! Task executor capability and registry.
//!
//! Executors run one task's body (e.g. an inference call) given input and
//! a timeout. The registry maps executor names to implementations, resolved
//! once per task. Cancellation is cooperative: executors receive a token
//! and should stop early when it fires, but a call that cannot be
//! interrupted may keep running; the scheduler discards its result.

pub mod command;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use command::CommandExecutor;

/// Failure modes of a single execution attempt
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The task body failed; eligible for retry per policy
    #[error("{0}")]
    Failed(String),

    /// The executor itself observed the timeout expiring
    #[error("Execution timed out after {0:?}")]
    TimedOut(Duration),

    /// The executor observed cancellation and stopped early
    #[error("Execution cancelled")]
    Cancelled,
}

/// Runs one task attempt
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executor name as referenced by `Task::executor`
    fn name(&self) -> &str;

    /// Execute the task body. Must return within `timeout` on the happy
    /// path; the scheduler additionally enforces the timeout externally
    /// and abandons late results.
    async fn execute(
        &self,
        input: &serde_json::Value,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ExecutorError>;
}

/// Name-to-executor mapping shared across the engine
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own name
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    /// Resolve an executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Whether an executor is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }
}
