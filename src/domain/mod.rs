//! Domain data structures for orchestration requests, results, and review.

pub mod request;
pub mod result;
pub mod review;

pub use request::{Backoff, OrchestrationRequest, RejectAction, RetryConfig, Task};
pub use result::{
    ExecutionTimeline, OrchestrationResult, OrchestrationState, TaskResult, TaskStatus, TaskTiming,
};
pub use review::{
    IssueType, PolicyRule, ReviewCriteria, ReviewDecision, ReviewStatus, Severity, ValidationIssue,
};
