//! Append-only orchestration persistence.
//!
//! Records are stored as newline-delimited JSON (JSONL), one log per
//! orchestration, partitioned by tenant id. Reads replay the log in
//! order. Writes are best-effort from the coordinator's point of view:
//! a failure here degrades observability, never the orchestration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{
    OrchestrationRequest, OrchestrationResult, OrchestrationState, ReviewDecision, TaskResult,
};

/// One append-only log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Record {
    /// Orchestration accepted; `fingerprint` identifies the request content
    Submitted {
        request: OrchestrationRequest,
        fingerprint: String,
        recorded_at: DateTime<Utc>,
    },

    /// Coordinator state transition (status-only update)
    StateChanged {
        state: OrchestrationState,
        recorded_at: DateTime<Utc>,
    },

    /// A task reached a terminal state
    TaskCompleted {
        result: TaskResult,
        recorded_at: DateTime<Utc>,
    },

    /// The review gate produced a decision
    DecisionRecorded {
        decision: ReviewDecision,
        recorded_at: DateTime<Utc>,
    },

    /// Terminal artifact for the orchestration
    Completed {
        result: OrchestrationResult,
        recorded_at: DateTime<Utc>,
    },
}

/// File-based append-only store using JSONL logs
pub struct OrchestrationStore {
    base_dir: PathBuf,
}

impl OrchestrationStore {
    /// Create a store rooted at `base_dir` (one subdirectory per tenant)
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn orchestration_dir(&self, tenant_id: &str, orchestration_id: Uuid) -> PathBuf {
        self.base_dir
            .join(sanitize(tenant_id))
            .join(orchestration_id.to_string())
    }

    fn records_path(&self, tenant_id: &str, orchestration_id: Uuid) -> PathBuf {
        self.orchestration_dir(tenant_id, orchestration_id)
            .join("records.jsonl")
    }

    /// Append a record to an orchestration's log
    pub async fn append(
        &self,
        tenant_id: &str,
        orchestration_id: Uuid,
        record: &Record,
    ) -> Result<()> {
        let dir = self.orchestration_dir(tenant_id, orchestration_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create orchestration dir: {}", dir.display()))?;

        let path = self.records_path(tenant_id, orchestration_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open records file: {}", path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write record")?;
        file.flush().await.context("Failed to flush record")?;

        Ok(())
    }

    /// Replay an orchestration's records in append order
    pub async fn replay(&self, tenant_id: &str, orchestration_id: Uuid) -> Result<Vec<Record>> {
        let path = self.records_path(tenant_id, orchestration_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open records file: {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Load the terminal result for an orchestration, if it completed
    pub async fn load_result(
        &self,
        tenant_id: &str,
        orchestration_id: Uuid,
    ) -> Result<Option<OrchestrationResult>> {
        let records = self.replay(tenant_id, orchestration_id).await?;
        Ok(records.into_iter().rev().find_map(|record| match record {
            Record::Completed { result, .. } => Some(result),
            _ => None,
        }))
    }

    /// Last recorded state for an orchestration, derived from the log
    pub async fn load_state(
        &self,
        tenant_id: &str,
        orchestration_id: Uuid,
    ) -> Result<Option<OrchestrationState>> {
        let records = self.replay(tenant_id, orchestration_id).await?;
        let mut state = None;
        for record in records {
            match record {
                Record::Submitted { .. } => state = Some(OrchestrationState::Submitted),
                Record::StateChanged { state: s, .. } => state = Some(s),
                Record::Completed { .. } => state = Some(OrchestrationState::Completed),
                _ => {}
            }
        }
        Ok(state)
    }

    /// Find an orchestration by id without knowing its tenant (scans the
    /// tenant partitions; used by the read API)
    pub async fn find_tenant(&self, orchestration_id: Uuid) -> Result<Option<String>> {
        if !self.base_dir.exists() {
            return Ok(None);
        }

        let target = orchestration_id.to_string();
        let mut tenants = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = tenants.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if entry.path().join(&target).is_dir() {
                if let Some(tenant) = entry.file_name().to_str() {
                    return Ok(Some(tenant.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// List orchestration ids recorded for a tenant
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Uuid>> {
        let tenant_dir = self.base_dir.join(sanitize(tenant_id));
        if !tenant_dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&tenant_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(id) = Uuid::parse_str(name) {
                        ids.push(id);
                    }
                }
            }
        }

        Ok(ids)
    }

    /// Base directory of the store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// Content fingerprint of a request (first 16 hex chars of SHA-256)
pub fn request_fingerprint(request: &OrchestrationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(request).unwrap_or_default());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn sanitize(tenant_id: &str) -> String {
    tenant_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (OrchestrationStore, TempDir) {
        let temp = TempDir::new().unwrap();
        (OrchestrationStore::new(temp.path().to_path_buf()), temp)
    }

    #[tokio::test]
    async fn test_append_and_replay_order() {
        let (store, _temp) = store();
        let id = Uuid::new_v4();

        for i in 0..5 {
            let record = Record::TaskCompleted {
                result: TaskResult::success(format!("task{}", i), serde_json::json!({})),
                recorded_at: Utc::now(),
            };
            store.append("acme", id, &record).await.unwrap();
        }

        let records = store.replay("acme", id).await.unwrap();
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            match record {
                Record::TaskCompleted { result, .. } => {
                    assert_eq!(result.task_id, format!("task{}", i));
                }
                other => panic!("unexpected record {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_replay_unknown_orchestration_is_empty() {
        let (store, _temp) = store();
        let records = store.replay("acme", Uuid::new_v4()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_tenant_partitioning() {
        let (store, _temp) = store();
        let id = Uuid::new_v4();

        let record = Record::StateChanged {
            state: OrchestrationState::Executing,
            recorded_at: Utc::now(),
        };
        store.append("tenant-a", id, &record).await.unwrap();

        assert_eq!(store.replay("tenant-a", id).await.unwrap().len(), 1);
        assert!(store.replay("tenant-b", id).await.unwrap().is_empty());
        assert_eq!(store.find_tenant(id).await.unwrap().as_deref(), Some("tenant-a"));
    }

    #[tokio::test]
    async fn test_load_state_follows_log() {
        let (store, _temp) = store();
        let id = Uuid::new_v4();

        for state in [OrchestrationState::Scheduling, OrchestrationState::Executing] {
            store
                .append(
                    "acme",
                    id,
                    &Record::StateChanged {
                        state,
                        recorded_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(
            store.load_state("acme", id).await.unwrap(),
            Some(OrchestrationState::Executing)
        );
    }

    #[tokio::test]
    async fn test_list_by_tenant() {
        let (store, _temp) = store();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let record = Record::StateChanged {
            state: OrchestrationState::Submitted,
            recorded_at: Utc::now(),
        };

        store.append("acme", first, &record).await.unwrap();
        store.append("acme", second, &record).await.unwrap();

        let mut ids = store.list("acme").await.unwrap();
        ids.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_fingerprint_stable_and_content_sensitive() {
        let request = OrchestrationRequest::from_yaml(
            "tenant_id: acme\ncriteria_id: default\ntasks: []\n",
        )
        .unwrap();
        let mut other = request.clone();
        other.criteria_id = "strict".to_string();

        assert_eq!(request_fingerprint(&request), request_fingerprint(&request));
        assert_ne!(request_fingerprint(&request), request_fingerprint(&other));
        assert_eq!(request_fingerprint(&request).len(), 16);
    }
}
