// regression-loop-rs/src/model.rs
// Core data model for the adaptive regression loop.
//
// Everything here is a plain serde DTO. ChangeRecord, TestCase and
// ExecutionResult are append-only: once constructed they are never
// mutated, so cycle history stays auditable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized representation of a detected change in the target system.
///
/// Produced by the external change-detection collaborator; the loop only
/// requires `origin` and `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// File paths, API names, or free-text fragments describing the change.
    pub origin: Vec<String>,
    /// Raw change payload (diff text, structured event, ...), if available.
    pub payload: Option<serde_json::Value>,
}

impl ChangeRecord {
    pub fn new(origin: Vec<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            origin,
            payload,
        }
    }
}

/// A domain label attached to a change record by the classifier.
///
/// `confidence` is advisory and lives in [0, 1]; the generator may bias
/// sampling with it but only hard-filters when explicitly configured to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainTag {
    pub domain: String,
    pub confidence: f64,
}

/// Concrete value instantiated for one pattern parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl FieldValue {
    /// Render the value the way expected-result templates embed it.
    /// Floats are fixed to two decimals so monetary amounts round-trip.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Float(v) => format!("{v:.2}"),
            FieldValue::Text(v) => v.clone(),
            FieldValue::Bool(v) => v.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// One generated, ready-to-run test case. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub pattern_id: String,
    pub domain: String,
    /// Instantiated parameter values, keyed by field name. BTreeMap keeps
    /// serialization order stable across runs.
    pub values: BTreeMap<String, FieldValue>,
    /// Expected-result assertion, derived purely from `values`.
    pub expected_result: String,
    pub cycle_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome category of a single execution.
///
/// `Error` is deliberately distinct from `Fail`: it signals harness or
/// collaborator instability rather than a comparator mismatch, and the
/// feedback engine penalizes it with a smaller, capped step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Error => write!(f, "error"),
        }
    }
}

/// Result of executing one test case against the system under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub test_case_id: String,
    pub verdict: Verdict,
    /// Actual payload returned by the system under test, or a structured
    /// description of the failure/timeout for `Error` verdicts.
    pub observed: Option<serde_json::Value>,
    pub finished_at: DateTime<Utc>,
}

/// Applied weight change for one (domain, pattern) pair, reported per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightDelta {
    pub domain: String,
    pub pattern_id: String,
    pub old_weight: f64,
    pub new_weight: f64,
}

/// Per-domain verdict tallies for a cycle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
}

impl VerdictCounts {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Pass => self.pass += 1,
            Verdict::Fail => self.fail += 1,
            Verdict::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.error
    }
}

/// Structured summary emitted at the end of each generation cycle.
///
/// This is the loop's reporting surface: a stable serde mapping suitable
/// for dashboards or log pipelines, not a prescribed wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub changes_seen: usize,
    pub changes_skipped: usize,
    pub cases_generated: usize,
    pub domain_counts: BTreeMap<String, VerdictCounts>,
    pub weight_deltas: Vec<WeightDelta>,
    /// False when the loop is disabled or the cycle was cancelled before
    /// adaptation; weights are then untouched.
    pub adaptation_applied: bool,
}
