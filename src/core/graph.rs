//! Dependency graph construction and wave computation.
//!
//! Pure and side-effect free: builds adjacency from the request's
//! dependency map, rejects cycles before any task runs, and orders tasks
//! into execution waves. Wave 0 holds tasks with no prerequisites; wave k
//! holds tasks whose prerequisites are all satisfied by earlier waves.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::OrchestrationRequest;
use crate::error::ConfigurationError;

/// Validated DAG over the request's tasks
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Task ids in submission order
    order: Vec<String>,

    /// task id -> prerequisite ids
    prerequisites: HashMap<String, Vec<String>>,

    /// task id -> ids that depend on it
    dependents: HashMap<String, Vec<String>>,

    /// Execution waves, each a set of task ids in submission order
    waves: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build and validate the graph for a request.
    ///
    /// Fails with `CyclicDependency` (naming the cycle members) if the
    /// dependency map is not acyclic. The request must already have passed
    /// `OrchestrationRequest::validate`, so every referenced id exists.
    pub fn build(request: &OrchestrationRequest) -> Result<Self, ConfigurationError> {
        let order: Vec<String> = request.tasks.iter().map(|t| t.id.clone()).collect();

        let mut prerequisites: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for id in &order {
            prerequisites.insert(id.clone(), Vec::new());
            dependents.insert(id.clone(), Vec::new());
        }
        for (task_id, prereqs) in &request.dependencies {
            for prereq in prereqs {
                prerequisites
                    .get_mut(task_id)
                    .ok_or_else(|| ConfigurationError::UnknownTask {
                        task_id: task_id.clone(),
                    })?
                    .push(prereq.clone());
                dependents
                    .get_mut(prereq)
                    .ok_or_else(|| ConfigurationError::UnknownTask {
                        task_id: prereq.clone(),
                    })?
                    .push(task_id.clone());
            }
        }

        let waves = compute_waves(&order, &prerequisites, &dependents)?;

        Ok(Self {
            order,
            prerequisites,
            dependents,
            waves,
        })
    }

    /// Ordered execution waves
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// All task ids, in submission order
    pub fn task_ids(&self) -> &[String] {
        &self.order
    }

    /// Direct prerequisites of a task
    pub fn prerequisites_of(&self, task_id: &str) -> &[String] {
        self.prerequisites
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every task transitively depending on `task_id` (excluding itself)
    pub fn dependents_of(&self, task_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(task_id);

        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.dependents.get(current) {
                for child in children {
                    if seen.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }
        }

        seen
    }

    /// Advisory critical-path estimate: the largest sum of effective task
    /// timeouts along any prerequisite chain. Used for the submit
    /// response's `estimated_completion_ms`; no deadline is enforced.
    pub fn critical_path_ms(&self, request: &OrchestrationRequest) -> u64 {
        let mut path: HashMap<&str, u64> = HashMap::new();

        for wave in &self.waves {
            for task_id in wave {
                let own = request
                    .get_task(task_id)
                    .map(|t| t.timeout(request.default_task_timeout()).as_millis() as u64)
                    .unwrap_or(0);
                let longest_prereq = self
                    .prerequisites_of(task_id)
                    .iter()
                    .filter_map(|p| path.get(p.as_str()))
                    .max()
                    .copied()
                    .unwrap_or(0);
                path.insert(task_id, own + longest_prereq);
            }
        }

        path.values().max().copied().unwrap_or(0)
    }
}

/// Kahn's algorithm, tie-broken by submission order within each wave
fn compute_waves(
    order: &[String],
    prerequisites: &HashMap<String, Vec<String>>,
    dependents: &HashMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>, ConfigurationError> {
    let mut in_degree: HashMap<&str, usize> = order
        .iter()
        .map(|id| (id.as_str(), prerequisites[id].len()))
        .collect();

    let mut waves = Vec::new();
    let mut resolved: HashSet<String> = HashSet::new();

    while resolved.len() < order.len() {
        let wave: Vec<String> = order
            .iter()
            .filter(|id| !resolved.contains(id.as_str()) && in_degree[id.as_str()] == 0)
            .cloned()
            .collect();

        if wave.is_empty() {
            // Remaining tasks all sit on a cycle (or depend on one);
            // walk prerequisites among them to name one cycle.
            let remaining: Vec<String> = order
                .iter()
                .filter(|id| !resolved.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(ConfigurationError::CyclicDependency {
                cycle: find_cycle(&remaining, prerequisites),
            });
        }

        for id in &wave {
            resolved.insert(id.clone());
            for dependent in &dependents[id] {
                *in_degree.get_mut(dependent.as_str()).unwrap() -= 1;
            }
        }
        waves.push(wave);
    }

    Ok(waves)
}

/// Walk prerequisite edges among unresolved tasks until a node repeats
fn find_cycle(remaining: &[String], prerequisites: &HashMap<String, Vec<String>>) -> Vec<String> {
    let unresolved: HashSet<&str> = remaining.iter().map(String::as_str).collect();
    let start = remaining[0].clone();

    let mut path = vec![start.clone()];
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(start.clone());
    let mut current = start;

    loop {
        let next = prerequisites[&current]
            .iter()
            .find(|p| unresolved.contains(p.as_str()))
            .cloned();
        match next {
            Some(next) => {
                if !seen.insert(next.clone()) {
                    // Close the loop at the repeated node
                    let pos = path.iter().position(|p| *p == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[pos..].to_vec();
                    cycle.push(next);
                    return cycle;
                }
                path.push(next.clone());
                current = next;
            }
            None => return path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrchestrationRequest;

    fn request(yaml: &str) -> OrchestrationRequest {
        OrchestrationRequest::from_yaml(yaml).unwrap()
    }

    const DIAMOND_YAML: &str = r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: a, executor: command }
  - { id: b, executor: command }
  - { id: c, executor: command }
  - { id: d, executor: command }
dependencies:
  b: [a]
  c: [a]
  d: [b, c]
"#;

    #[test]
    fn test_diamond_waves() {
        let graph = DependencyGraph::build(&request(DIAMOND_YAML)).unwrap();
        assert_eq!(
            graph.waves(),
            &[
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn test_waves_partition_task_set() {
        let graph = DependencyGraph::build(&request(DIAMOND_YAML)).unwrap();
        let mut all: Vec<&String> = graph.waves().iter().flatten().collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), graph.task_ids().len());
    }

    #[test]
    fn test_independent_tasks_share_wave_zero() {
        let yaml = r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: x, executor: command }
  - { id: y, executor: command }
  - { id: z, executor: command }
"#;
        let graph = DependencyGraph::build(&request(yaml)).unwrap();
        assert_eq!(graph.waves().len(), 1);
        // Submission order is preserved within a wave
        assert_eq!(graph.waves()[0], vec!["x", "y", "z"]);
    }

    #[test]
    fn test_cycle_rejected_and_named() {
        let yaml = r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: a, executor: command }
  - { id: b, executor: command }
  - { id: c, executor: command }
dependencies:
  a: [c]
  b: [a]
  c: [b]
"#;
        let err = DependencyGraph::build(&request(yaml)).unwrap_err();
        match err {
            ConfigurationError::CyclicDependency { cycle } => {
                assert!(cycle.len() >= 3);
                // The cycle closes on its starting node
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let yaml = r#"
tenant_id: acme
criteria_id: default
tasks:
  - { id: a, executor: command }
dependencies:
  a: [a]
"#;
        assert!(matches!(
            DependencyGraph::build(&request(yaml)),
            Err(ConfigurationError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = DependencyGraph::build(&request(DIAMOND_YAML)).unwrap();
        let downstream = graph.dependents_of("a");
        assert_eq!(downstream.len(), 3);
        assert!(downstream.contains("d"));
        assert!(graph.dependents_of("d").is_empty());
    }

    #[test]
    fn test_empty_task_list() {
        let yaml = r#"
tenant_id: acme
criteria_id: default
tasks: []
"#;
        let graph = DependencyGraph::build(&request(yaml)).unwrap();
        assert!(graph.waves().is_empty());
    }

    #[test]
    fn test_critical_path_uses_longest_chain() {
        let mut req = request(DIAMOND_YAML);
        req.task_timeout_ms = Some(1000);
        req.tasks[1].timeout_ms = Some(5000); // b
        let graph = DependencyGraph::build(&req).unwrap();
        // a(1000) -> b(5000) -> d(1000)
        assert_eq!(graph.critical_path_ms(&req), 7000);
    }
}
