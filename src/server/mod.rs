//! HTTP API for orchestration submission and criteria administration.
//!
//! Submission is asynchronous: POST /orchestration validates the request,
//! returns 202 with the orchestration id, and runs the pipeline in a
//! background task. Reads are served from the append-only store, so a
//! restart loses in-flight work but never recorded history.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::OrchestrationCoordinator;
use crate::domain::{OrchestrationRequest, OrchestrationResult, OrchestrationState, ReviewCriteria};
use crate::review::CriteriaStore;

/// Shared handles for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<OrchestrationCoordinator>,
    pub criteria: Arc<CriteriaStore>,

    /// Root token; each accepted orchestration runs under a child of it
    pub shutdown: CancellationToken,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orchestration", post(submit_orchestration))
        .route("/orchestration/:id", get(get_orchestration))
        .route("/review-criteria", post(upsert_criteria))
        .route("/review-criteria/:id", get(get_criteria))
        .with_state(state)
}

/// Bind and serve until the shutdown token fires
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    Ok(())
}

#[derive(Serialize)]
struct SubmitResponse {
    orchestration_id: Uuid,
    status: &'static str,

    /// Advisory: critical-path sum of effective task timeouts
    estimated_completion_ms: u64,
}

async fn submit_orchestration(
    State(state): State<AppState>,
    Json(request): Json<OrchestrationRequest>,
) -> Response {
    let estimated = match state.coordinator.estimate_completion_ms(&request) {
        Ok(ms) => ms,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let orchestration_id = Uuid::new_v4();
    let coordinator = state.coordinator.clone();
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        if let Err(e) = coordinator.run_as(orchestration_id, request, cancel).await {
            warn!(%orchestration_id, error = %e, "Orchestration ended in error");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            orchestration_id,
            status: "submitted",
            estimated_completion_ms: estimated,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct OrchestrationView {
    orchestration_id: Uuid,
    tenant_id: String,
    state: Option<OrchestrationState>,

    /// Present once the orchestration reached a terminal state
    result: Option<OrchestrationResult>,
}

async fn get_orchestration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    let store = state.coordinator.store();

    let tenant = match store.find_tenant(id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "orchestration not found"),
        Err(e) => return internal_error(&e),
    };

    let current = match store.load_state(&tenant, id).await {
        Ok(state) => state,
        Err(e) => return internal_error(&e),
    };
    let result = match store.load_result(&tenant, id).await {
        Ok(result) => result,
        Err(e) => return internal_error(&e),
    };

    Json(OrchestrationView {
        orchestration_id: id,
        tenant_id: tenant,
        state: current,
        result,
    })
    .into_response()
}

async fn upsert_criteria(
    State(state): State<AppState>,
    Json(criteria): Json<ReviewCriteria>,
) -> Response {
    let id = criteria.id.clone();
    let version = criteria.version;

    match state.criteria.put(criteria).await {
        Ok(()) => Json(json!({ "id": id, "version": version })).into_response(),
        Err(e) => internal_error(&e),
    }
}

async fn get_criteria(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.criteria.fetch_uncached(&id).await {
        Ok(Some(criteria)) => Json(criteria).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "criteria not found"),
        Err(e) => internal_error(&e),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn internal_error(error: &anyhow::Error) -> Response {
    warn!(error = %error, "Request handling failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::executors::{ExecutorError, ExecutorRegistry, TaskExecutor};
    use crate::review::MemoryCriteriaSource;
    use crate::store::OrchestrationStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

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

    fn test_state(temp: &tempfile::TempDir) -> AppState {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor));

        let criteria = Arc::new(CriteriaStore::new(
            Arc::new(MemoryCriteriaSource::default()),
            Duration::from_secs(60),
        ));
        let store = Arc::new(OrchestrationStore::new(temp.path().to_path_buf()));
        let coordinator = Arc::new(OrchestrationCoordinator::new(
            registry,
            criteria.clone(),
            store,
            EngineSettings::default(),
        ));

        AppState {
            coordinator,
            criteria,
            shutdown: CancellationToken::new(),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn simple_request() -> serde_json::Value {
        json!({
            "tenant_id": "acme",
            "criteria_id": "default",
            "task_timeout_ms": 5000,
            "tasks": [
                { "id": "fetch", "executor": "echo", "input": { "note": "hello" } }
            ],
            "dependencies": {}
        })
    }

    #[tokio::test]
    async fn test_submit_returns_202_and_result_becomes_readable() {
        let temp = tempfile::TempDir::new().unwrap();
        let app = router(test_state(&temp));

        let response = app
            .clone()
            .oneshot(post("/orchestration", simple_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = json_body(response).await;
        assert_eq!(body["status"], "submitted");
        assert!(body["estimated_completion_ms"].as_u64().unwrap() > 0);
        let id = body["orchestration_id"].as_str().unwrap().to_string();

        // Execution is backgrounded; poll until the terminal record lands
        let mut result = serde_json::Value::Null;
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(get_req(&format!("/orchestration/{}", id)))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                let body = json_body(response).await;
                if !body["result"].is_null() {
                    result = body["result"].clone();
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(result["decision"]["status"], "approved");
        assert_eq!(result["task_results"]["fetch"]["status"], "success");
    }

    #[tokio::test]
    async fn test_cyclic_request_rejected_with_400() {
        let temp = tempfile::TempDir::new().unwrap();
        let app = router(test_state(&temp));

        let mut request = simple_request();
        request["tasks"] = json!([
            { "id": "a", "executor": "echo" },
            { "id": "b", "executor": "echo" }
        ]);
        request["dependencies"] = json!({ "a": ["b"], "b": ["a"] });

        let response = app.oneshot(post("/orchestration", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("Cyclic"));
    }

    #[tokio::test]
    async fn test_unknown_orchestration_is_404() {
        let temp = tempfile::TempDir::new().unwrap();
        let app = router(test_state(&temp));

        let response = app
            .oneshot(get_req(&format!("/orchestration/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_criteria_upsert_and_fetch() {
        let temp = tempfile::TempDir::new().unwrap();
        let app = router(test_state(&temp));

        let criteria = json!({
            "id": "quarterly-report",
            "tenant_id": "acme",
            "required_sections": ["summary"],
            "version": 2
        });

        let response = app
            .clone()
            .oneshot(post("/review-criteria", criteria))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["version"], 2);

        let response = app
            .clone()
            .oneshot(get_req("/review-criteria/quarterly-report"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["required_sections"], json!(["summary"]));

        let response = app
            .oneshot(get_req("/review-criteria/absent"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
