//! Orchestration coordinator.
//!
//! Wires graph validation, scheduling, aggregation, and review into one
//! request/response flow and applies the configured reject action. State
//! transitions and results are persisted best-effort: storage failures
//! are logged and never abort the orchestration.
//!
//! States: Submitted -> Scheduling -> Executing -> Aggregating ->
//! Reviewing -> {Approved | Rejected -> (Retrying | Escalated | Errored)}
//! -> Completed. No external event re-enters a completed orchestration.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::domain::{
    OrchestrationRequest, OrchestrationResult, OrchestrationState, RejectAction, ReviewDecision,
};
use crate::error::{ConfigurationError, OrchestrationError};
use crate::executors::ExecutorRegistry;
use crate::review::{CriteriaStore, ReviewEngine};
use crate::store::{request_fingerprint, OrchestrationStore, Record};

use super::aggregator::ResultAggregator;
use super::graph::DependencyGraph;
use super::scheduler::ParallelScheduler;

/// Drives one orchestration from submission to completion
pub struct OrchestrationCoordinator {
    registry: ExecutorRegistry,
    aggregator: ResultAggregator,
    review: ReviewEngine,
    store: Arc<OrchestrationStore>,
    settings: EngineSettings,
}

impl OrchestrationCoordinator {
    pub fn new(
        registry: ExecutorRegistry,
        criteria_store: Arc<CriteriaStore>,
        store: Arc<OrchestrationStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            aggregator: ResultAggregator::new(),
            review: ReviewEngine::new(criteria_store),
            store,
            settings,
        }
    }

    /// Validate a request synchronously, before any task executes.
    /// Returns the dependency graph on success.
    pub fn validate(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<DependencyGraph, ConfigurationError> {
        request.validate()?;

        for task in &request.tasks {
            if !self.registry.contains(&task.executor) {
                return Err(ConfigurationError::UnknownExecutor {
                    task_id: task.id.clone(),
                    executor: task.executor.clone(),
                });
            }
        }

        DependencyGraph::build(request)
    }

    /// Advisory completion estimate for a request (critical-path sum of
    /// effective task timeouts); no deadline is enforced from it
    pub fn estimate_completion_ms(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<u64, ConfigurationError> {
        let graph = self.validate(request)?;
        let mut request = request.clone();
        self.apply_engine_defaults(&mut request);
        Ok(graph.critical_path_ms(&request))
    }

    /// Fill in engine-configured defaults the request left unspecified
    fn apply_engine_defaults(&self, request: &mut OrchestrationRequest) {
        if request.task_timeout_ms.is_none() {
            request.task_timeout_ms = Some(self.settings.default_task_timeout_ms);
        }
    }

    /// Execute a request to completion and return the terminal artifact.
    ///
    /// Only configuration errors are raised before execution; task
    /// failures and timeouts are captured inside the result. A review
    /// rejection surfaces as an error only under `reject_action = error`.
    pub async fn run(
        &self,
        request: OrchestrationRequest,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        self.run_as(Uuid::new_v4(), request, cancel).await
    }

    /// Like [`run`](Self::run) with a caller-assigned orchestration id,
    /// so the HTTP layer can hand the id back before execution finishes
    #[instrument(skip_all, fields(%orchestration_id, tenant = %request.tenant_id))]
    pub async fn run_as(
        &self,
        orchestration_id: Uuid,
        mut request: OrchestrationRequest,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let graph = self.validate(&request)?;
        self.apply_engine_defaults(&mut request);
        let tenant = request.tenant_id.clone();
        let started = Utc::now();

        info!(%orchestration_id, tasks = request.tasks.len(), "Orchestration submitted");
        self.persist(
            &tenant,
            orchestration_id,
            &Record::Submitted {
                request: request.clone(),
                fingerprint: request_fingerprint(&request),
                recorded_at: Utc::now(),
            },
        )
        .await;

        let mut pass = 0u32;
        loop {
            pass += 1;

            // Scheduling / Executing: discard any stale partial state from
            // a rejected pass and re-run the full task set
            self.transition(&tenant, orchestration_id, OrchestrationState::Scheduling)
                .await;
            self.transition(&tenant, orchestration_id, OrchestrationState::Executing)
                .await;
            let (task_results, timeline) =
                ParallelScheduler::run(&graph, &request, &self.registry, cancel.clone()).await;

            for result in task_results.values() {
                self.persist(
                    &tenant,
                    orchestration_id,
                    &Record::TaskCompleted {
                        result: result.clone(),
                        recorded_at: Utc::now(),
                    },
                )
                .await;
            }

            // Aggregating
            self.transition(&tenant, orchestration_id, OrchestrationState::Aggregating)
                .await;
            let candidate = self
                .aggregator
                .aggregate(&request.merge_strategy, &task_results);

            // Reviewing
            self.transition(&tenant, orchestration_id, OrchestrationState::Reviewing)
                .await;
            let decision = self
                .review
                .review(orchestration_id, &request.criteria_id, &tenant, &candidate)
                .await;
            self.persist(
                &tenant,
                orchestration_id,
                &Record::DecisionRecorded {
                    decision: decision.clone(),
                    recorded_at: Utc::now(),
                },
            )
            .await;

            let total_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
            let result = OrchestrationResult {
                orchestration_id,
                request_id: request.id,
                task_results,
                timeline,
                decision: decision.clone(),
                total_duration_ms: total_ms,
                completed_at: Utc::now(),
            };

            if decision.is_approved() {
                self.transition(&tenant, orchestration_id, OrchestrationState::Approved)
                    .await;
                return Ok(self.complete(&tenant, result).await);
            }

            self.transition(&tenant, orchestration_id, OrchestrationState::Rejected)
                .await;
            match self.apply_reject_action(&request, &decision, pass) {
                RejectOutcome::Retry => {
                    info!(%orchestration_id, pass, "Review rejected, retrying from scheduler");
                    self.transition(&tenant, orchestration_id, OrchestrationState::Retrying)
                        .await;
                    continue;
                }
                RejectOutcome::Escalate => {
                    warn!(%orchestration_id, "Review rejected, escalated for human follow-up");
                    self.transition(&tenant, orchestration_id, OrchestrationState::Escalated)
                        .await;
                    return Ok(self.complete(&tenant, result).await);
                }
                RejectOutcome::Error => {
                    let feedback = decision.feedback.clone();
                    self.transition(
                        &tenant,
                        orchestration_id,
                        OrchestrationState::Errored {
                            error: feedback.clone(),
                        },
                    )
                    .await;
                    // The result is still persisted so the rejection can
                    // be inspected after the fact
                    self.complete(&tenant, result).await;
                    return Err(OrchestrationError::ReviewRejected {
                        orchestration_id,
                        feedback,
                    });
                }
            }
        }
    }

    fn apply_reject_action(
        &self,
        request: &OrchestrationRequest,
        _decision: &ReviewDecision,
        pass: u32,
    ) -> RejectOutcome {
        match request.reject_action {
            // The review retry ceiling is distinct from per-task retries;
            // once exhausted the rejection is escalated instead
            RejectAction::Retry if pass <= self.settings.review_retry_limit => {
                RejectOutcome::Retry
            }
            RejectAction::Retry => RejectOutcome::Escalate,
            RejectAction::Escalate => RejectOutcome::Escalate,
            RejectAction::Error => RejectOutcome::Error,
        }
    }

    /// Persist the terminal artifact and mark the orchestration completed
    async fn complete(&self, tenant: &str, result: OrchestrationResult) -> OrchestrationResult {
        self.persist(
            tenant,
            result.orchestration_id,
            &Record::Completed {
                result: result.clone(),
                recorded_at: Utc::now(),
            },
        )
        .await;
        info!(
            orchestration_id = %result.orchestration_id,
            approved = result.decision.is_approved(),
            total_ms = result.total_duration_ms,
            "Orchestration completed"
        );
        result
    }

    async fn transition(&self, tenant: &str, orchestration_id: Uuid, state: OrchestrationState) {
        self.persist(
            tenant,
            orchestration_id,
            &Record::StateChanged {
                state,
                recorded_at: Utc::now(),
            },
        )
        .await;
    }

    async fn persist(&self, tenant: &str, orchestration_id: Uuid, record: &Record) {
        if let Err(e) = self.store.append(tenant, orchestration_id, record).await {
            warn!(%orchestration_id, error = %e, "Persistence write failed (continuing)");
        }
    }

    /// The persistence handle, for read-side consumers (HTTP API, CLI)
    pub fn store(&self) -> &Arc<OrchestrationStore> {
        &self.store
    }
}

enum RejectOutcome {
    Retry,
    Escalate,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReviewCriteria, ReviewStatus, TaskStatus};
    use crate::executors::{ExecutorError, TaskExecutor};
    use crate::review::{CriteriaSource, MemoryCriteriaSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Echoes its input (after an optional `sleep_ms`); counts executions
    /// for retry assertions
    struct EchoExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            input: &serde_json::Value,
            _timeout: Duration,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = input["sleep_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(input.clone())
        }
    }

    struct Fixture {
        coordinator: OrchestrationCoordinator,
        echo: Arc<EchoExecutor>,
        _temp: tempfile::TempDir,
    }

    async fn fixture(criteria: Option<ReviewCriteria>) -> Fixture {
        fixture_with(criteria, EngineSettings::default()).await
    }

    async fn fixture_with(criteria: Option<ReviewCriteria>, settings: EngineSettings) -> Fixture {
        let echo = Arc::new(EchoExecutor {
            calls: AtomicU32::new(0),
        });
        let mut registry = ExecutorRegistry::new();
        registry.register(echo.clone());

        let source = Arc::new(MemoryCriteriaSource::default());
        if let Some(criteria) = criteria {
            source.put(criteria).await.unwrap();
        }
        let criteria_store = Arc::new(CriteriaStore::new(source, Duration::from_secs(60)));

        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(OrchestrationStore::new(temp.path().to_path_buf()));

        Fixture {
            coordinator: OrchestrationCoordinator::new(registry, criteria_store, store, settings),
            echo,
            _temp: temp,
        }
    }

    fn request(yaml: &str) -> OrchestrationRequest {
        OrchestrationRequest::from_yaml(yaml).unwrap()
    }

    const HAPPY_YAML: &str = r#"
tenant_id: acme
criteria_id: default
task_timeout_ms: 5000
tasks:
  - { id: fetch, executor: echo, input: { summary: "revenue up" } }
  - { id: analyze, executor: echo, input: { detail: "12 percent" } }
dependencies:
  analyze: [fetch]
"#;

    #[tokio::test]
    async fn test_happy_path_completes_approved() {
        let fixture = fixture(None).await;
        let result = fixture
            .coordinator
            .run(request(HAPPY_YAML), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.task_results.len(), 2);
        assert!(result.task_results.values().all(|r| r.is_success()));
        assert_eq!(result.decision.status, ReviewStatus::Approved);
        assert!(result.timeline.workflow_completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_executor_rejected_synchronously() {
        let fixture = fixture(None).await;
        let bad = request(
            r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: a, executor: ghost }
"#,
        );

        let err = fixture
            .coordinator
            .run(bad, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Configuration(ConfigurationError::UnknownExecutor { .. })
        ));
        // Nothing executed
        assert_eq!(fixture.echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_rejected_synchronously() {
        let fixture = fixture(None).await;
        let bad = request(
            r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: a, executor: echo }
  - { id: b, executor: echo }
dependencies:
  a: [b]
  b: [a]
"#,
        );

        let err = fixture
            .coordinator
            .run(bad, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Configuration(ConfigurationError::CyclicDependency { .. })
        ));
        assert_eq!(fixture.echo.calls.load(Ordering::SeqCst), 0);
    }

    fn strict_criteria() -> ReviewCriteria {
        let mut criteria = ReviewCriteria::fallback("acme");
        criteria.id = "strict".to_string();
        criteria.required_sections = vec!["unobtainable".to_string()];
        criteria
    }

    #[tokio::test]
    async fn test_reject_action_escalate_completes_with_rejection() {
        let fixture = fixture(Some(strict_criteria())).await;
        let mut req = request(HAPPY_YAML);
        req.criteria_id = "strict".to_string();
        req.reject_action = RejectAction::Escalate;

        let result = fixture
            .coordinator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.decision.status, ReviewStatus::Rejected);
        // No re-execution on escalate
        assert_eq!(fixture.echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reject_action_retry_reruns_full_task_set() {
        let fixture = fixture(Some(strict_criteria())).await;
        let mut req = request(HAPPY_YAML);
        req.criteria_id = "strict".to_string();
        req.reject_action = RejectAction::Retry;

        // Criteria stay unsatisfiable, so the retry ceiling (1) is hit and
        // the rejection escalates: 2 passes x 2 tasks
        let result = fixture
            .coordinator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.decision.status, ReviewStatus::Rejected);
        assert_eq!(fixture.echo.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_configured_timeout_default_applies_when_request_omits_it() {
        let settings = EngineSettings {
            default_task_timeout_ms: 100,
            ..EngineSettings::default()
        };
        let fixture = fixture_with(None, settings).await;

        let req = request(
            r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: slow, executor: echo, input: { sleep_ms: 2000 } }
"#,
        );
        assert_eq!(req.task_timeout_ms, None);

        let result = fixture
            .coordinator
            .run(req, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.task_results["slow"].status, TaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_rejection_recorded_before_reject_action() {
        let fixture = fixture(Some(strict_criteria())).await;
        let mut req = request(HAPPY_YAML);
        req.criteria_id = "strict".to_string();
        req.reject_action = RejectAction::Escalate;

        let result = fixture
            .coordinator
            .run(req, CancellationToken::new())
            .await
            .unwrap();

        let records = fixture
            .coordinator
            .store()
            .replay("acme", result.orchestration_id)
            .await
            .unwrap();
        let states: Vec<OrchestrationState> = records
            .iter()
            .filter_map(|record| match record {
                Record::StateChanged { state, .. } => Some(state.clone()),
                _ => None,
            })
            .collect();

        let reviewing = states
            .iter()
            .position(|s| *s == OrchestrationState::Reviewing)
            .unwrap();
        let rejected = states
            .iter()
            .position(|s| *s == OrchestrationState::Rejected)
            .unwrap();
        let escalated = states
            .iter()
            .position(|s| *s == OrchestrationState::Escalated)
            .unwrap();
        assert!(reviewing < rejected);
        assert!(rejected < escalated);
    }

    #[tokio::test]
    async fn test_reject_action_error_surfaces_rejection() {
        let fixture = fixture(Some(strict_criteria())).await;
        let mut req = request(HAPPY_YAML);
        req.criteria_id = "strict".to_string();
        req.reject_action = RejectAction::Error;

        let err = fixture
            .coordinator
            .run(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ReviewRejected { .. }));
    }

    #[tokio::test]
    async fn test_result_persisted_and_reloadable() {
        let fixture = fixture(None).await;
        let result = fixture
            .coordinator
            .run(request(HAPPY_YAML), CancellationToken::new())
            .await
            .unwrap();

        let reloaded = fixture
            .coordinator
            .store()
            .load_result("acme", result.orchestration_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reloaded, result);
    }

    #[tokio::test]
    async fn test_empty_request_completes_immediately() {
        let fixture = fixture(None).await;
        let result = fixture
            .coordinator
            .run(
                request("tenant_id: acme\ncriteria_id: default\ntasks: []\n"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.task_results.is_empty());
        assert_eq!(result.decision.status, ReviewStatus::Approved);
    }

    #[tokio::test]
    async fn test_failed_task_visible_in_candidate_and_result() {
        let fixture = fixture(None).await;
        let req = request(
            r#"
tenant_id: acme
criteria_id: default
task_timeout_ms: 200
tasks:
  - { id: ok, executor: echo, input: { note: "fine" } }
  - { id: missing, executor: echo }
dependencies: {}
"#,
        );
        // Both succeed here; the partial-result path is covered in the
        // scheduler tests. This asserts the terminal state wiring.
        let result = fixture
            .coordinator
            .run(req, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.task_results["ok"].status, TaskStatus::Success);
    }
}
