//! Wave-by-wave parallel task execution.
//!
//! All ready tasks of a wave run concurrently; the scheduler suspends only
//! at wave boundaries, waiting for every task in the current wave to reach
//! a terminal state before releasing the next wave. A failing or timed-out
//! task never blocks independent siblings; its transitive dependents are
//! marked failed with an upstream-failure reason and never executed.

use std::collections::HashMap;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::{ExecutionTimeline, OrchestrationRequest, TaskResult};
use crate::executors::{ExecutorError, ExecutorRegistry};

use super::graph::DependencyGraph;
use super::retry::RetryPolicy;

/// Executes the waves of a dependency graph
pub struct ParallelScheduler;

impl ParallelScheduler {
    /// Run every task of the graph and return per-task results plus the
    /// execution timeline. Never fails as a whole: task failures, timeouts,
    /// and upstream short-circuits are captured inside the results.
    #[instrument(skip_all, fields(request_id = %request.id, waves = graph.waves().len()))]
    pub async fn run(
        graph: &DependencyGraph,
        request: &OrchestrationRequest,
        registry: &ExecutorRegistry,
        cancel: CancellationToken,
    ) -> (HashMap<String, TaskResult>, ExecutionTimeline) {
        let mut results: HashMap<String, TaskResult> = HashMap::new();
        let mut timeline = ExecutionTimeline::new();

        // Doomed tasks: id -> the upstream prerequisite that sank them
        let mut upstream_failed: HashMap<String, String> = HashMap::new();

        for (wave_idx, wave) in graph.waves().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(wave = wave_idx, "Cancellation observed, skipping remaining waves");
                break;
            }

            debug!(wave = wave_idx, tasks = wave.len(), "Launching wave");
            let mut join_set: JoinSet<(String, TaskResult)> = JoinSet::new();

            for task_id in wave {
                timeline.record_queued(task_id);

                // Dependents of an earlier failure are recorded, not run
                if let Some(upstream) = upstream_failed.get(task_id) {
                    let result = TaskResult::upstream_failure(task_id, upstream);
                    timeline.record_completed(task_id);
                    results.insert(task_id.clone(), result);
                    continue;
                }

                let task = match request.get_task(task_id) {
                    Some(task) => task.clone(),
                    None => continue,
                };
                let executor = match registry.get(&task.executor) {
                    Some(executor) => executor,
                    None => {
                        // Submission validation rejects this; recorded for
                        // safety. Dependents are doomed like any failure.
                        let result = TaskResult::failed(
                            task_id,
                            format!("Unknown executor '{}'", task.executor),
                        );
                        timeline.record_completed(task_id);
                        results.insert(task_id.clone(), result);
                        for dependent in graph.dependents_of(task_id) {
                            upstream_failed
                                .entry(dependent)
                                .or_insert_with(|| task_id.clone());
                        }
                        continue;
                    }
                };

                let task_timeout = task.timeout(request.default_task_timeout());
                let task_cancel = cancel.child_token();
                timeline.record_started(task_id);

                join_set.spawn(async move {
                    let result = RetryPolicy::execute(&task.id, &task.retry, |_attempt| {
                        let executor = executor.clone();
                        let input = task.input.clone();
                        let attempt_cancel = task_cancel.clone();
                        async move {
                            // The outer timeout is authoritative: a hung
                            // executor is abandoned, its eventual result
                            // discarded rather than awaited.
                            match timeout(
                                task_timeout,
                                executor.execute(&input, task_timeout, attempt_cancel),
                            )
                            .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Err(ExecutorError::TimedOut(task_timeout)),
                            }
                        }
                    })
                    .await;
                    (task.id.clone(), result)
                });
            }

            // Wave gate: every spawned task must reach a terminal state
            while let Some(joined) = join_set.join_next().await {
                let (task_id, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        // A panicking task body is a task failure, not a
                        // scheduler failure; its id is unrecoverable from
                        // the join error so siblings are unaffected.
                        warn!(error = %e, "Task execution panicked");
                        continue;
                    }
                };

                timeline.record_completed(&task_id);
                if !result.is_success() {
                    for dependent in graph.dependents_of(&task_id) {
                        upstream_failed
                            .entry(dependent)
                            .or_insert_with(|| task_id.clone());
                    }
                }
                results.insert(task_id, result);
            }

            // Tasks whose spawn was skipped above and panicked tasks leave
            // gaps; fill them so the result map always covers the wave.
            for task_id in wave {
                if !results.contains_key(task_id) {
                    timeline.record_completed(task_id);
                    results.insert(
                        task_id.clone(),
                        TaskResult::failed(task_id, "Task execution aborted unexpectedly"),
                    );
                    for dependent in graph.dependents_of(task_id) {
                        upstream_failed
                            .entry(dependent)
                            .or_insert_with(|| task_id.clone());
                    }
                }
            }
        }

        // Anything never reached (cancellation) is recorded as failed
        for task_id in graph.task_ids() {
            if !results.contains_key(task_id) {
                results.insert(
                    task_id.clone(),
                    TaskResult::failed(task_id, "Cancelled before execution"),
                );
            }
        }

        timeline.finish();
        info!(
            tasks = results.len(),
            succeeded = results.values().filter(|r| r.is_success()).count(),
            "Scheduler finished"
        );

        (results, timeline)
    }
}
