//! Review criteria loading and TTL-bounded caching.
//!
//! Criteria are owned externally and read through a source trait (file or
//! in-memory). Cached entries are served until their TTL expires; on
//! expiry at most one refresh per id is in flight and concurrent readers
//! share it. An unknown id or an unreachable source degrades to built-in
//! defaults with a warning, never an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::ReviewCriteria;

/// Backing store for review criteria
#[async_trait]
pub trait CriteriaSource: Send + Sync {
    /// Fetch criteria by id; Ok(None) means the id is unknown
    async fn fetch(&self, id: &str) -> Result<Option<ReviewCriteria>>;

    /// Create or replace criteria (administrative writes)
    async fn put(&self, criteria: ReviewCriteria) -> Result<()>;
}

/// File-backed source: one YAML document per criteria id
pub struct FileCriteriaSource {
    dir: PathBuf,
}

impl FileCriteriaSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        // Criteria ids come from requests; keep them from escaping the dir
        let safe: String = id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.yaml", safe))
    }
}

#[async_trait]
impl CriteriaSource for FileCriteriaSource {
    async fn fetch(&self, id: &str) -> Result<Option<ReviewCriteria>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read criteria file: {}", path.display()))?;
        Ok(Some(ReviewCriteria::from_yaml(&content)?))
    }

    async fn put(&self, criteria: ReviewCriteria) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create criteria dir: {}", self.dir.display()))?;
        let path = self.path_for(&criteria.id);
        let content = serde_yaml::to_string(&criteria).context("Failed to serialize criteria")?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write criteria file: {}", path.display()))?;
        Ok(())
    }
}

/// In-memory source used in tests and as the admin API's default backend
#[derive(Default)]
pub struct MemoryCriteriaSource {
    entries: Mutex<HashMap<String, ReviewCriteria>>,
}

#[async_trait]
impl CriteriaSource for MemoryCriteriaSource {
    async fn fetch(&self, id: &str) -> Result<Option<ReviewCriteria>> {
        Ok(self.entries.lock().get(id).cloned())
    }

    async fn put(&self, criteria: ReviewCriteria) -> Result<()> {
        self.entries.lock().insert(criteria.id.clone(), criteria);
        Ok(())
    }
}

struct CacheEntry {
    criteria: ReviewCriteria,
    fetched_at: Instant,
}

/// TTL-cached criteria handle shared across orchestrations
pub struct CriteriaStore {
    source: Arc<dyn CriteriaSource>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,

    /// Per-id refresh gates; concurrent readers of an expired entry wait
    /// on the same gate instead of issuing duplicate fetches
    refresh_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CriteriaStore {
    /// Default TTL for cached criteria
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    pub fn new(source: Arc<dyn CriteriaSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
            refresh_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Get criteria by id, serving the cache inside the TTL and falling
    /// back to built-in defaults when the id is unknown or the source is
    /// unreachable. Never fails.
    pub async fn get(&self, id: &str, tenant_id: &str) -> ReviewCriteria {
        if let Some(criteria) = self.cached(id) {
            return criteria;
        }

        let gate = self.gate_for(id);
        let _held = gate.lock().await;

        // Another caller may have finished the refresh while we waited
        if let Some(criteria) = self.cached(id) {
            return criteria;
        }

        let criteria = match self.source.fetch(id).await {
            Ok(Some(criteria)) => {
                debug!(criteria_id = id, version = criteria.version, "Criteria refreshed");
                criteria
            }
            Ok(None) => {
                warn!(criteria_id = id, "Criteria id unknown, using built-in defaults");
                ReviewCriteria::fallback(tenant_id)
            }
            Err(e) => {
                warn!(criteria_id = id, error = %e, "Criteria source unreachable, using built-in defaults");
                ReviewCriteria::fallback(tenant_id)
            }
        };

        self.cache.lock().insert(
            id.to_string(),
            CacheEntry {
                criteria: criteria.clone(),
                fetched_at: Instant::now(),
            },
        );
        criteria
    }

    /// Write criteria through to the source and drop the cached entry so
    /// the next read observes the new version immediately
    pub async fn put(&self, criteria: ReviewCriteria) -> Result<()> {
        self.source.put(criteria.clone()).await?;
        self.cache.lock().remove(&criteria.id);
        Ok(())
    }

    /// Read directly from the source, bypassing the cache (admin reads)
    pub async fn fetch_uncached(&self, id: &str) -> Result<Option<ReviewCriteria>> {
        self.source.fetch(id).await
    }

    fn cached(&self, id: &str) -> Option<ReviewCriteria> {
        let cache = self.cache.lock();
        cache.get(id).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.ttl).then(|| entry.criteria.clone())
        })
    }

    fn gate_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_gates
            .lock()
            .entry(id.to_string())
            .or_default()
            .clone()
    }
}
