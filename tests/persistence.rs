//! Persistence Integration Tests
//!
//! A completed orchestration leaves a replayable record trail, and the
//! reloaded terminal artifact matches what the caller received.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use maestro::config::EngineSettings;
use maestro::core::OrchestrationCoordinator;
use maestro::domain::{OrchestrationRequest, OrchestrationState};
use maestro::executors::{ExecutorError, ExecutorRegistry, TaskExecutor};
use maestro::review::{CriteriaStore, MemoryCriteriaSource};
use maestro::store::{OrchestrationStore, Record};

struct EchoExecutor;

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
        Ok(input.clone())
    }
}

fn coordinator(store: Arc<OrchestrationStore>) -> OrchestrationCoordinator {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(EchoExecutor));

    let criteria = Arc::new(CriteriaStore::new(
        Arc::new(MemoryCriteriaSource::default()),
        Duration::from_secs(60),
    ));
    OrchestrationCoordinator::new(registry, criteria, store, EngineSettings::default())
}

fn request(tenant: &str) -> OrchestrationRequest {
    OrchestrationRequest::from_yaml(&format!(
        r#"
tenant_id: {}
criteria_id: default
task_timeout_ms: 5000
tasks:
  - {{ id: fetch, executor: echo, input: {{ note: "hello" }} }}
  - {{ id: report, executor: echo, input: {{ note: "world" }} }}
dependencies:
  report: [fetch]
"#,
        tenant
    ))
    .unwrap()
}

#[tokio::test]
async fn test_record_trail_covers_the_lifecycle() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(OrchestrationStore::new(temp.path().to_path_buf()));
    let coordinator = coordinator(store.clone());

    let result = coordinator
        .run(request("acme"), CancellationToken::new())
        .await
        .unwrap();

    let records = store.replay("acme", result.orchestration_id).await.unwrap();
    assert!(!records.is_empty());

    // Submission opens the log with a content fingerprint
    match &records[0] {
        Record::Submitted { fingerprint, .. } => assert_eq!(fingerprint.len(), 16),
        other => panic!("expected Submitted first, got {other:?}"),
    }
    // The terminal artifact closes it
    assert!(matches!(records.last().unwrap(), Record::Completed { .. }));

    // Every task left a completion record
    let completed_tasks: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            Record::TaskCompleted { result, .. } => Some(result.task_id.as_str()),
            _ => None,
        })
        .collect();
    assert!(completed_tasks.contains(&"fetch"));
    assert!(completed_tasks.contains(&"report"));

    // State transitions appear in pipeline order
    let states: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            Record::StateChanged { state, .. } => Some(state.clone()),
            _ => None,
        })
        .collect();
    let scheduling = states
        .iter()
        .position(|s| *s == OrchestrationState::Scheduling)
        .unwrap();
    let reviewing = states
        .iter()
        .position(|s| *s == OrchestrationState::Reviewing)
        .unwrap();
    assert!(scheduling < reviewing);
    assert!(states.contains(&OrchestrationState::Approved));
}

#[tokio::test]
async fn test_reloaded_result_matches_returned_result() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(OrchestrationStore::new(temp.path().to_path_buf()));
    let coordinator = coordinator(store.clone());

    let result = coordinator
        .run(request("acme"), CancellationToken::new())
        .await
        .unwrap();

    // A fresh store over the same directory simulates a process restart
    let reopened = OrchestrationStore::new(temp.path().to_path_buf());
    let reloaded = reopened
        .load_result("acme", result.orchestration_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reloaded, result);
    assert_eq!(
        reopened
            .load_state("acme", result.orchestration_id)
            .await
            .unwrap(),
        Some(OrchestrationState::Completed)
    );
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(OrchestrationStore::new(temp.path().to_path_buf()));
    let coordinator = coordinator(store.clone());

    let first = coordinator
        .run(request("tenant-a"), CancellationToken::new())
        .await
        .unwrap();
    let second = coordinator
        .run(request("tenant-b"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        store.list("tenant-a").await.unwrap(),
        vec![first.orchestration_id]
    );
    assert_eq!(
        store.list("tenant-b").await.unwrap(),
        vec![second.orchestration_id]
    );
    // Reads never cross the partition boundary
    assert!(store
        .load_result("tenant-a", second.orchestration_id)
        .await
        .unwrap()
        .is_none());
}
