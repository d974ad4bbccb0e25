// regression-loop-rs/src/classifier.rs
// Keyword-based domain classification for change records.

use once_cell::sync::Lazy;

use crate::model::{ChangeRecord, DomainTag};

/// Strategy interface for mapping a change record to domain tags.
///
/// Implementations may be heuristic-only (the default keyword table) or
/// backed by a learned model satisfying the same signature. Returning an
/// empty vec is a legitimate outcome: it means "no domain-specific
/// generation triggered for this change", not an error.
pub trait DomainClassifier: Send + Sync {
    fn classify(&self, record: &ChangeRecord) -> Vec<DomainTag>;
}

/// One row of the keyword table: substrings whose presence in a change
/// record votes for `domain`.
#[derive(Debug, Clone)]
pub struct DomainRule {
    pub domain: String,
    pub keywords: Vec<String>,
}

impl DomainRule {
    pub fn new(domain: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            domain: domain.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

static DEFAULT_RULES: Lazy<Vec<DomainRule>> = Lazy::new(|| {
    vec![
        DomainRule::new(
            "financial_transaction",
            &["transfer", "account", "balance", "payment", "ledger", "debit", "credit"],
        ),
        DomainRule::new(
            "fraud_detection",
            &["limit", "velocity", "new_account", "suspicious", "fraud", "threshold"],
        ),
    ]
});

/// Keyword classifier over the record's origin entries and raw payload.
///
/// Confidence is the fraction of a rule's keywords that matched, clamped
/// to [0, 1]. A change can span domains, so several rules may fire.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<DomainRule>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }
}

impl KeywordClassifier {
    pub fn new(rules: Vec<DomainRule>) -> Self {
        Self { rules }
    }

    /// Add a rule to the table; later rules are consulted like any other.
    pub fn with_rule(mut self, rule: DomainRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn haystack(record: &ChangeRecord) -> String {
        let mut text = record.origin.join(" ");
        if let Some(payload) = &record.payload {
            if let Some(raw) = payload.as_str() {
                text.push(' ');
                text.push_str(raw);
            } else if let Ok(raw) = serde_json::to_string(payload) {
                text.push(' ');
                text.push_str(&raw);
            }
        }
        text.to_ascii_lowercase()
    }
}

impl DomainClassifier for KeywordClassifier {
    fn classify(&self, record: &ChangeRecord) -> Vec<DomainTag> {
        let haystack = Self::haystack(record);
        if haystack.trim().is_empty() {
            tracing::warn!(
                change.id = %record.id,
                "change record has an empty origin; skipping classification"
            );
            return Vec::new();
        }

        let mut tags = Vec::new();
        for rule in &self.rules {
            if rule.keywords.is_empty() {
                continue;
            }
            let hits = rule
                .keywords
                .iter()
                .filter(|k| haystack.contains(k.as_str()))
                .count();
            if hits > 0 {
                let confidence =
                    (hits as f64 / rule.keywords.len() as f64).clamp(0.0, 1.0);
                tags.push(DomainTag {
                    domain: rule.domain.clone(),
                    confidence,
                });
            }
        }

        // Highest-confidence domains first so callers can bias toward them.
        tags.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if tags.is_empty() {
            tracing::debug!(
                change.id = %record.id,
                "no domain rule matched; change will be skipped"
            );
        }

        tags
    }
}
