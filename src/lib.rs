//! maestro - concurrent task orchestration with review gating
//!
//! Executes DAGs of tasks in dependency-ordered waves, merges their
//! outputs into a candidate response, and gates it behind an automated
//! review (sections, consistency, quality, policy, redaction) before a
//! caller sees it.
//!
//! # Architecture
//!
//! - Requests are validated up front: unknown tasks, unknown executors,
//!   and dependency cycles are rejected before anything runs
//! - Independent tasks run concurrently within a wave; a failed task
//!   short-circuits its downstream subtree, never its siblings
//! - Every record is appended to a per-orchestration JSONL log,
//!   partitioned by tenant; reads replay the log
//!
//! # Modules
//!
//! - `core`: graph, scheduler, retry, aggregation, coordinator
//! - `domain`: requests, results, review criteria and decisions
//! - `executors`: task execution capability and registry
//! - `review`: criteria store, validation pipeline, redaction
//! - `store`: append-only persistence
//! - `server`: HTTP API
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a request and wait for the reviewed result
//! maestro submit request.yaml
//!
//! # Check orchestration status
//! maestro status <orchestration-id>
//!
//! # Run the HTTP API
//! maestro serve --address 127.0.0.1:9000
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod executors;
pub mod review;
pub mod server;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{DependencyGraph, OrchestrationCoordinator, ParallelScheduler, ResultAggregator};
pub use domain::{
    OrchestrationRequest, OrchestrationResult, OrchestrationState, RejectAction, ReviewCriteria,
    ReviewDecision, ReviewStatus, Task, TaskResult, TaskStatus,
};
pub use error::{ConfigurationError, OrchestrationError};
pub use executors::{ExecutorRegistry, TaskExecutor};
pub use review::{CriteriaStore, ReviewEngine};
pub use store::OrchestrationStore;
