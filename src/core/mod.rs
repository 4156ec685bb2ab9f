//! Core orchestration logic.
//!
//! This module contains:
//! - `graph`: dependency graph validation and wave computation
//! - `retry`: bounded retry with backoff around task attempts
//! - `scheduler`: wave-by-wave concurrent execution
//! - `aggregator`: merge of task results into a candidate response
//! - `coordinator`: the request/response state machine

pub mod aggregator;
pub mod coordinator;
pub mod graph;
pub mod retry;
pub mod scheduler;

pub use aggregator::ResultAggregator;
pub use coordinator::OrchestrationCoordinator;
pub use graph::DependencyGraph;
pub use retry::RetryPolicy;
pub use scheduler::ParallelScheduler;
