// regression-loop-rs/src/library.rs
// Per-domain catalog of parameterized test-case templates.
//
// Patterns are validated at registration time; a contradictory schema is
// rejected with SchemaError before any generation can observe it. After
// registration a Pattern is immutable; only its weight (held elsewhere,
// see weights.rs) changes over time.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::FieldValue;

/// Sampling rule for one pattern parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ParamSpec {
    /// Uniform integer in [min, max].
    IntRange { min: i64, max: i64 },
    /// Uniform float in [min, max].
    FloatRange { min: f64, max: f64 },
    /// Uniform draw from a fixed whitelist.
    Choice { options: Vec<String> },
    /// Always the given value.
    Const { value: FieldValue },
    /// Derived field: strictly exceeds `limit`, at most `limit * cap_factor`.
    /// Sampled uniformly in the half-open-below interval (limit, limit*cap].
    ExceedsLimit { limit: f64, cap_factor: f64 },
}

/// Malformed pattern definition. Fatal at registration time only; nothing
/// downstream of a successful `register` can raise this.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("pattern id and domain must be non-empty")]
    EmptyIdentity,

    #[error("pattern '{pattern}' already registered for domain '{domain}'")]
    Duplicate { domain: String, pattern: String },

    #[error("field '{field}' of pattern '{pattern}': range lower bound exceeds upper bound")]
    InvertedRange { pattern: String, field: String },

    #[error("field '{field}' of pattern '{pattern}': choice set is empty")]
    EmptyChoice { pattern: String, field: String },

    #[error("field '{field}' of pattern '{pattern}': cap_factor must be > 1")]
    BadCapFactor { pattern: String, field: String },

    #[error("expected template of pattern '{pattern}' references undeclared field '{placeholder}'")]
    UnknownPlaceholder { pattern: String, placeholder: String },
}

/// Parameterized template for generating concrete test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub domain: String,
    /// Field name -> sampling rule. BTreeMap keeps instantiation order
    /// deterministic for a given seed.
    pub params: BTreeMap<String, ParamSpec>,
    /// Expected-outcome template with `{field}` placeholders.
    pub expected_template: String,
}

impl Pattern {
    pub fn new(
        id: impl Into<String>,
        domain: impl Into<String>,
        params: BTreeMap<String, ParamSpec>,
        expected_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            params,
            expected_template: expected_template.into(),
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.id.trim().is_empty() || self.domain.trim().is_empty() {
            return Err(SchemaError::EmptyIdentity);
        }

        for (field, spec) in &self.params {
            match spec {
                ParamSpec::IntRange { min, max } if min > max => {
                    return Err(SchemaError::InvertedRange {
                        pattern: self.id.clone(),
                        field: field.clone(),
                    });
                }
                ParamSpec::FloatRange { min, max } if min > max => {
                    return Err(SchemaError::InvertedRange {
                        pattern: self.id.clone(),
                        field: field.clone(),
                    });
                }
                ParamSpec::Choice { options } if options.is_empty() => {
                    return Err(SchemaError::EmptyChoice {
                        pattern: self.id.clone(),
                        field: field.clone(),
                    });
                }
                ParamSpec::ExceedsLimit { cap_factor, .. } if *cap_factor <= 1.0 => {
                    return Err(SchemaError::BadCapFactor {
                        pattern: self.id.clone(),
                        field: field.clone(),
                    });
                }
                _ => {}
            }
        }

        for placeholder in template_placeholders(&self.expected_template) {
            if !self.params.contains_key(&placeholder) {
                return Err(SchemaError::UnknownPlaceholder {
                    pattern: self.id.clone(),
                    placeholder,
                });
            }
        }

        Ok(())
    }

    /// Derive the expected-result assertion from concrete field values.
    ///
    /// Pure function of `values`: re-deriving from a stored TestCase's
    /// values always reproduces the stored assertion.
    pub fn derive_expected(&self, values: &BTreeMap<String, FieldValue>) -> String {
        render_template(&self.expected_template, values)
    }
}

/// Extract `{name}` placeholders from a template.
fn template_placeholders(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start + 1..];
        match tail.find('}') {
            Some(end) => {
                out.push(tail[..end].to_string());
                rest = &tail[end + 1..];
            }
            None => break,
        }
    }
    out
}

fn render_template(template: &str, values: &BTreeMap<String, FieldValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find('}') {
            Some(end) => {
                let name = &tail[..end];
                match values.get(name) {
                    Some(value) => out.push_str(&value.render()),
                    // Unreachable after registration validation; kept as a
                    // visible marker rather than a panic.
                    None => out.push_str(&format!("{{{name}}}")),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Registry of patterns keyed by domain, in registration order.
#[derive(Debug, Default)]
pub struct PatternLibrary {
    by_domain: HashMap<String, Vec<Pattern>>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern, rejecting contradictory schemas up front.
    pub fn register(&mut self, pattern: Pattern) -> Result<(), SchemaError> {
        pattern.validate()?;

        let existing = self.by_domain.entry(pattern.domain.clone()).or_default();
        if existing.iter().any(|p| p.id == pattern.id) {
            return Err(SchemaError::Duplicate {
                domain: pattern.domain,
                pattern: pattern.id,
            });
        }

        tracing::debug!(
            pattern.id = %pattern.id,
            pattern.domain = %pattern.domain,
            "registered pattern"
        );
        existing.push(pattern);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        patterns: impl IntoIterator<Item = Pattern>,
    ) -> Result<(), SchemaError> {
        for pattern in patterns {
            self.register(pattern)?;
        }
        Ok(())
    }

    /// Patterns for a domain in registration order; empty for unknown domains.
    pub fn patterns_for(&self, domain: &str) -> &[Pattern] {
        self.by_domain.get(domain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, domain: &str, pattern_id: &str) -> Option<&Pattern> {
        self.patterns_for(domain).iter().find(|p| p.id == pattern_id)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.by_domain.keys().map(String::as_str)
    }
}

/// Configuration for the built-in financial-transaction pattern set.
#[derive(Debug, Clone)]
pub struct FinancialPatternConfig {
    pub amount_range: (f64, f64),
    pub valid_accounts: Vec<String>,
    pub transaction_type: String,
}

impl Default for FinancialPatternConfig {
    fn default() -> Self {
        Self {
            amount_range: (1.0, 1000.0),
            valid_accounts: vec!["A123".into(), "B456".into(), "C789".into()],
            transaction_type: "credit".into(),
        }
    }
}

/// Built-in patterns for the `financial_transaction` domain.
pub fn financial_transaction_patterns(cfg: &FinancialPatternConfig) -> Vec<Pattern> {
    let mut params = BTreeMap::new();
    params.insert(
        "amount".to_string(),
        ParamSpec::FloatRange {
            min: cfg.amount_range.0,
            max: cfg.amount_range.1,
        },
    );
    params.insert(
        "account".to_string(),
        ParamSpec::Choice {
            options: cfg.valid_accounts.clone(),
        },
    );
    params.insert(
        "transaction_type".to_string(),
        ParamSpec::Const {
            value: FieldValue::Text(cfg.transaction_type.clone()),
        },
    );

    vec![Pattern::new(
        "valid_transaction",
        "financial_transaction",
        params,
        "Transaction processed: {transaction_type} of {amount} to account {account}",
    )]
}

/// Configuration for the built-in fraud-detection pattern set.
#[derive(Debug, Clone)]
pub struct FraudPatternConfig {
    pub transaction_limit: f64,
    pub velocity_window_seconds: i64,
    pub velocity_threshold: (i64, i64),
}

impl Default for FraudPatternConfig {
    fn default() -> Self {
        Self {
            transaction_limit: 10_000.0,
            velocity_window_seconds: 60,
            velocity_threshold: (10, 50),
        }
    }
}

/// Built-in patterns for the `fraud_detection` domain.
pub fn fraud_detection_patterns(cfg: &FraudPatternConfig) -> Vec<Pattern> {
    let mut large_amount = BTreeMap::new();
    large_amount.insert(
        "amount".to_string(),
        ParamSpec::ExceedsLimit {
            limit: cfg.transaction_limit,
            cap_factor: 1.5,
        },
    );
    large_amount.insert(
        "transaction_count".to_string(),
        ParamSpec::Const {
            value: FieldValue::Int(1),
        },
    );
    large_amount.insert(
        "suspicious".to_string(),
        ParamSpec::Const {
            value: FieldValue::Bool(true),
        },
    );

    let mut high_velocity = BTreeMap::new();
    high_velocity.insert(
        "transaction_count".to_string(),
        ParamSpec::IntRange {
            min: cfg.velocity_threshold.0,
            max: cfg.velocity_threshold.1,
        },
    );
    high_velocity.insert(
        "window_seconds".to_string(),
        ParamSpec::Const {
            value: FieldValue::Int(cfg.velocity_window_seconds),
        },
    );
    high_velocity.insert(
        "suspicious".to_string(),
        ParamSpec::Const {
            value: FieldValue::Bool(true),
        },
    );

    let mut new_account = BTreeMap::new();
    new_account.insert(
        "account_age_days".to_string(),
        ParamSpec::IntRange { min: 0, max: 2 },
    );
    new_account.insert(
        "amount".to_string(),
        ParamSpec::ExceedsLimit {
            limit: cfg.transaction_limit,
            cap_factor: 1.2,
        },
    );
    new_account.insert(
        "suspicious".to_string(),
        ParamSpec::Const {
            value: FieldValue::Bool(true),
        },
    );

    vec![
        Pattern::new(
            "large_amount",
            "fraud_detection",
            large_amount,
            "Fraud alert: single transaction of {amount} exceeds limit",
        ),
        Pattern::new(
            "high_velocity",
            "fraud_detection",
            high_velocity,
            "Fraud alert: {transaction_count} transactions within {window_seconds}s",
        ),
        Pattern::new(
            "new_account_large_transfer",
            "fraud_detection",
            new_account,
            "Fraud alert: account aged {account_age_days} days moved {amount}",
        ),
    ]
}
