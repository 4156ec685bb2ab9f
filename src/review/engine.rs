//! Validation/redaction pipeline over the candidate response.
//!
//! Runs a fixed-order pipeline: section presence, consistency, quality
//! thresholds, policy rules, redaction. Every step runs and accumulates
//! issues; only the final decision rule short-circuits. Redaction always
//! runs, even on a response that will be rejected.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    IssueType, ReviewCriteria, ReviewDecision, ReviewStatus, Severity, ValidationIssue,
};

use super::redaction::Redactor;
use super::store::CriteriaStore;

/// Review gate applied to aggregated orchestration output
pub struct ReviewEngine {
    criteria_store: Arc<CriteriaStore>,
    redactor: Redactor,
}

impl ReviewEngine {
    pub fn new(criteria_store: Arc<CriteriaStore>) -> Self {
        Self {
            criteria_store,
            redactor: Redactor::new(),
        }
    }

    /// Review a candidate response against the named criteria, producing
    /// one immutable decision
    #[instrument(skip_all, fields(%orchestration_id, criteria_id))]
    pub async fn review(
        &self,
        orchestration_id: Uuid,
        criteria_id: &str,
        tenant_id: &str,
        candidate: &Value,
    ) -> ReviewDecision {
        let criteria = self.criteria_store.get(criteria_id, tenant_id).await;

        let mut issues = Vec::new();
        if criteria.enabled {
            check_required_sections(&criteria, candidate, &mut issues);
            check_consistency(candidate, &mut issues);
            check_quality_thresholds(&criteria, candidate, &mut issues);
            check_policy_rules(&criteria, candidate, &mut issues);
        }

        // Redaction is independent of the decision and never skipped: a
        // rejected response must not leak unredacted PII either.
        let (redacted_result, redactions) = self.redactor.redact_value(candidate);

        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let status = if has_critical {
            ReviewStatus::Rejected
        } else {
            ReviewStatus::Approved
        };

        let decision = ReviewDecision {
            id: Uuid::new_v4(),
            orchestration_id,
            status,
            confidence: confidence_for(&issues),
            feedback: synthesize_feedback(status, &issues, redactions, &criteria),
            issues,
            redacted_result,
            reviewed_at: Utc::now(),
        };

        info!(
            status = ?decision.status,
            issues = decision.issues.len(),
            redactions,
            "Review decision recorded"
        );
        decision
    }
}

/// Step 1: every required section name must appear in the response
fn check_required_sections(
    criteria: &ReviewCriteria,
    candidate: &Value,
    issues: &mut Vec<ValidationIssue>,
) {
    for section in &criteria.required_sections {
        if !section_present(candidate, section) {
            issues.push(ValidationIssue {
                issue_type: IssueType::MissingSection,
                severity: Severity::Critical,
                description: format!("Required section '{}' is absent from the response", section),
                affected_section: Some(section.clone()),
                remediation: format!(
                    "Add a '{}' section: include a task whose output contains a '{}' field, \
                     or a '## {}' heading in its text",
                    section, section, section
                ),
            });
        }
    }
}

/// A section is present if any object in the response carries it as a key
/// or any text value contains it as a markdown heading
fn section_present(value: &Value, section: &str) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(section) || map.values().any(|v| section_present(v, section))
        }
        Value::Array(items) => items.iter().any(|v| section_present(v, section)),
        Value::String(text) => {
            let heading = format!("## {}", section);
            text.lines().any(|line| line.trim().eq_ignore_ascii_case(heading.trim()))
        }
        _ => false,
    }
}

/// Step 2: tasks asserting different values for the same claim topic
fn check_consistency(candidate: &Value, issues: &mut Vec<ValidationIssue>) {
    // topic -> normalized value -> task entries asserting it
    let mut claims: BTreeMap<String, HashMap<String, Vec<String>>> = BTreeMap::new();

    if let Value::Object(entries) = candidate {
        for (task_id, output) in entries {
            if let Some(task_claims) = output.get("claims").and_then(Value::as_object) {
                for (topic, value) in task_claims {
                    let normalized = normalize_claim(value);
                    claims
                        .entry(topic.clone())
                        .or_default()
                        .entry(normalized)
                        .or_default()
                        .push(task_id.clone());
                }
            }
        }
    }

    for (topic, values) in claims {
        if values.len() > 1 {
            let mut claimants: Vec<String> = values
                .values()
                .flat_map(|tasks| tasks.iter().cloned())
                .collect();
            claimants.sort();
            issues.push(ValidationIssue {
                issue_type: IssueType::Inconsistency,
                severity: Severity::Major,
                description: format!(
                    "Tasks {} make contradicting claims about '{}'",
                    claimants.join(", "),
                    topic
                ),
                affected_section: Some(topic.clone()),
                remediation: format!(
                    "Reconcile the value of '{}' across tasks {} so all outputs agree",
                    topic,
                    claimants.join(", ")
                ),
            });
        }
    }
}

fn normalize_claim(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_lowercase(),
        other => other.to_string(),
    }
}

/// Step 3: each configured metric must meet its minimum; a configured
/// metric missing from the response counts as below threshold
fn check_quality_thresholds(
    criteria: &ReviewCriteria,
    candidate: &Value,
    issues: &mut Vec<ValidationIssue>,
) {
    let metrics = candidate.get("metrics").and_then(Value::as_object);

    let mut names: Vec<&String> = criteria.quality_thresholds.keys().collect();
    names.sort();

    for name in names {
        let minimum = criteria.quality_thresholds[name];
        let reported = metrics.and_then(|m| m.get(name)).and_then(Value::as_f64);

        match reported {
            Some(actual) if actual >= minimum => {}
            Some(actual) => issues.push(ValidationIssue {
                issue_type: IssueType::QualityBelowThreshold,
                severity: Severity::Major,
                description: format!(
                    "Metric '{}' is {:.2}, below the configured minimum {:.2}",
                    name, actual, minimum
                ),
                affected_section: Some(name.clone()),
                remediation: format!(
                    "Raise '{}' to at least {:.2}; current tasks report {:.2}",
                    name, minimum, actual
                ),
            }),
            None => issues.push(ValidationIssue {
                issue_type: IssueType::QualityBelowThreshold,
                severity: Severity::Major,
                description: format!(
                    "Metric '{}' (minimum {:.2}) was not reported by any task",
                    name, minimum
                ),
                affected_section: Some(name.clone()),
                remediation: format!(
                    "Have a task emit a numeric 'metrics.{}' value of at least {:.2}",
                    name, minimum
                ),
            }),
        }
    }
}

/// Step 4: configured policy rules; violations are always critical
fn check_policy_rules(
    criteria: &ReviewCriteria,
    candidate: &Value,
    issues: &mut Vec<ValidationIssue>,
) {
    let text = flatten_text(candidate).to_lowercase();

    for rule in &criteria.policy_rules {
        for term in &rule.forbidden_terms {
            if text.contains(&term.to_lowercase()) {
                issues.push(ValidationIssue {
                    issue_type: IssueType::PolicyViolation,
                    severity: Severity::Critical,
                    description: format!(
                        "Policy rule '{}' violated: response contains \"{}\"",
                        rule.name, term
                    ),
                    affected_section: None,
                    remediation: format!(
                        "Remove or rephrase the content matching \"{}\" to satisfy the '{}' \
                         policy ({})",
                        term, rule.name, rule.description
                    ),
                });
            }
        }
    }
}

/// Collect every string value of the response into one searchable blob
fn flatten_text(value: &Value) -> String {
    fn walk(value: &Value, out: &mut String) {
        match value {
            Value::String(s) => {
                out.push_str(s);
                out.push('\n');
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }
    let mut out = String::new();
    walk(value, &mut out);
    out
}

/// Confidence in the decision: starts at 1.0 and decays with findings
fn confidence_for(issues: &[ValidationIssue]) -> f64 {
    let penalty: f64 = issues
        .iter()
        .map(|issue| match issue.severity {
            Severity::Critical => 0.30,
            Severity::Major => 0.15,
            Severity::Minor => 0.05,
        })
        .sum();
    (1.0 - penalty).clamp(0.1, 1.0)
}

fn synthesize_feedback(
    status: ReviewStatus,
    issues: &[ValidationIssue],
    redactions: usize,
    criteria: &ReviewCriteria,
) -> String {
    let mut parts = Vec::new();

    match status {
        ReviewStatus::Approved if issues.is_empty() => {
            parts.push(format!(
                "Approved against criteria '{}' v{} with no findings.",
                criteria.id, criteria.version
            ));
        }
        ReviewStatus::Approved => {
            parts.push(format!(
                "Approved against criteria '{}' v{} with {} non-critical finding(s).",
                criteria.id,
                criteria.version,
                issues.len()
            ));
        }
        ReviewStatus::Rejected => {
            let critical = issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count();
            parts.push(format!(
                "Rejected against criteria '{}' v{}: {} critical finding(s) of {} total.",
                criteria.id,
                criteria.version,
                critical,
                issues.len()
            ));
        }
    }

    for issue in issues {
        parts.push(format!("- {} ({})", issue.description, issue.remediation));
    }
    if redactions > 0 {
        parts.push(format!("{} sensitive value(s) were redacted.", redactions));
    }

    parts.join("\n")
}
