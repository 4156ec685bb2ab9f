//! Review criteria, validation issues, and review decisions.
//!
//! Criteria are owned externally (administrative CRUD) and read through the
//! TTL-cached criteria store. Decisions are immutable once created.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation and redaction rules applied to a candidate response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCriteria {
    pub id: String,
    pub tenant_id: String,

    /// Section names that must appear in the candidate response
    #[serde(default)]
    pub required_sections: Vec<String>,

    /// Named metric -> minimum acceptable value
    #[serde(default)]
    pub quality_thresholds: HashMap<String, f64>,

    /// Policy/ethics rules (violations are always critical)
    #[serde(default)]
    pub policy_rules: Vec<PolicyRule>,

    /// Custom validation prompts, carried for executors that review with
    /// an inference call
    #[serde(default)]
    pub validation_prompts: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_enabled() -> bool {
    true
}
fn default_version() -> u32 {
    1
}

impl ReviewCriteria {
    /// Parse criteria from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse criteria YAML")
    }

    /// Built-in defaults used when the configured criteria id cannot be
    /// resolved. Conservative: no required sections or thresholds, but the
    /// standard policy rules still apply.
    pub fn fallback(tenant_id: impl Into<String>) -> Self {
        Self {
            id: "default".to_string(),
            tenant_id: tenant_id.into(),
            required_sections: Vec::new(),
            quality_thresholds: HashMap::new(),
            policy_rules: PolicyRule::builtin(),
            validation_prompts: Vec::new(),
            enabled: true,
            version: 0,
        }
    }
}

/// A single policy rule evaluated against the candidate response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule name used in issue descriptions (e.g. "bias", "harm")
    pub name: String,

    /// Keywords or phrases whose presence violates the rule
    #[serde(default)]
    pub forbidden_terms: Vec<String>,

    /// Human-readable statement of what the rule enforces
    #[serde(default)]
    pub description: String,
}

impl PolicyRule {
    /// Standard bias/discrimination/harm rules applied when no tenant
    /// criteria are available
    pub fn builtin() -> Vec<Self> {
        vec![
            Self {
                name: "discrimination".to_string(),
                forbidden_terms: vec![
                    "only suitable for men".to_string(),
                    "only suitable for women".to_string(),
                    "inferior race".to_string(),
                ],
                description: "Response must not contain discriminatory claims".to_string(),
            },
            Self {
                name: "harm".to_string(),
                forbidden_terms: vec![
                    "how to build a weapon".to_string(),
                    "self-harm instructions".to_string(),
                ],
                description: "Response must not contain harmful instructions".to_string(),
            },
        ]
    }
}

/// Category of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingSection,
    Inconsistency,
    PolicyViolation,
    QualityBelowThreshold,
}

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// A single finding from the review pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub affected_section: Option<String>,

    /// Actionable, non-generic guidance for fixing the issue
    pub remediation: String,
}

/// Outcome of the review gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Rejected,
}

/// One review decision per orchestration attempt, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub id: Uuid,
    pub orchestration_id: Uuid,
    pub status: ReviewStatus,

    /// Confidence in the decision, 0.0..=1.0
    pub confidence: f64,

    pub issues: Vec<ValidationIssue>,

    /// The candidate response with sensitive data masked. Populated on
    /// both approval and rejection: a rejected response must never leak
    /// unredacted PII.
    pub redacted_result: serde_json::Value,

    /// Synthesized feedback summarizing the findings
    pub feedback: String,

    pub reviewed_at: DateTime<Utc>,
}

impl ReviewDecision {
    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }

    /// Whether any finding is critical
    pub fn has_critical_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}
