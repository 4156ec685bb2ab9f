//! Pure merge of per-task results into one candidate response.
//!
//! Strategies are named and registered up front, not an open plugin
//! system. Failed tasks are always preserved explicitly in the merged
//! value so the review stage sees partial results instead of silent
//! omissions.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::domain::{TaskResult, TaskStatus};

/// A named, pure merge strategy
type MergeFn = fn(&[(&String, &TaskResult)]) -> Value;

/// Registry of named merge strategies
pub struct ResultAggregator {
    strategies: HashMap<&'static str, MergeFn>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    /// Registry with the built-in strategies (`keyed`, `concat`)
    pub fn new() -> Self {
        let mut strategies: HashMap<&'static str, MergeFn> = HashMap::new();
        strategies.insert("keyed", merge_keyed);
        strategies.insert("concat", merge_concat);
        Self { strategies }
    }

    /// Whether a strategy is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Merge task results using the named strategy. Falls back to `keyed`
    /// for an unknown name. Entries are merged in task-id order so the
    /// output is deterministic.
    pub fn aggregate(&self, strategy: &str, results: &HashMap<String, TaskResult>) -> Value {
        let merge = self
            .strategies
            .get(strategy)
            .copied()
            .unwrap_or(merge_keyed);

        let mut entries: Vec<(&String, &TaskResult)> = results.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        merge(&entries)
    }
}

/// Failed/timed-out entry preserved in the merged response
fn failure_entry(result: &TaskResult) -> Value {
    let status = match result.status {
        TaskStatus::TimedOut => "timed_out",
        _ => "failed",
    };
    json!({
        "status": status,
        "error": result.error.clone().unwrap_or_default(),
    })
}

/// Default: object keyed by task id. Successful outputs appear as-is,
/// failures as explicit `{status, error}` entries. Task-level `metrics`
/// objects are additionally unioned into a top-level `metrics` map for the
/// review stage's threshold checks; request validation reserves that task
/// id so the union cannot shadow a task entry.
fn merge_keyed(entries: &[(&String, &TaskResult)]) -> Value {
    let mut merged = Map::new();
    let mut metrics = Map::new();

    for (task_id, result) in entries {
        if result.is_success() {
            let output = result.output.clone().unwrap_or(Value::Null);
            if let Some(task_metrics) = output.get("metrics").and_then(Value::as_object) {
                for (name, value) in task_metrics {
                    metrics.insert(name.clone(), value.clone());
                }
            }
            merged.insert((*task_id).clone(), output);
        } else {
            merged.insert((*task_id).clone(), failure_entry(result));
        }
    }

    if !metrics.is_empty() {
        merged.insert("metrics".to_string(), Value::Object(metrics));
    }
    Value::Object(merged)
}

/// Ordered text concatenation of string-bearing outputs, with failures
/// listed separately under `failures`
fn merge_concat(entries: &[(&String, &TaskResult)]) -> Value {
    let mut sections = Vec::new();
    let mut failures = Map::new();

    for (task_id, result) in entries {
        if result.is_success() {
            let output = result.output.as_ref();
            let text = output
                .and_then(|o| o.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| output.and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| {
                    output.map(|o| o.to_string()).unwrap_or_default()
                });
            sections.push(format!("## {}\n{}", task_id, text));
        } else {
            failures.insert((*task_id).clone(), failure_entry(result));
        }
    }

    let mut merged = Map::new();
    merged.insert("text".to_string(), Value::String(sections.join("\n\n")));
    if !failures.is_empty() {
        merged.insert("failures".to_string(), Value::Object(failures));
    }
    Value::Object(merged)
}
