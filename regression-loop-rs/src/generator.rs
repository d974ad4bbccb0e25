// regression-loop-rs/src/generator.rs
// Weighted pattern sampling and concrete test-case instantiation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::library::{ParamSpec, Pattern, PatternLibrary};
use crate::model::{FieldValue, TestCase};
use crate::weights::WeightBook;

/// Draws patterns by weight and instantiates them into ready-to-run cases.
///
/// Weights are read from the shared WeightBook at call time; non-positive
/// weights are clamped to `epsilon` before normalization so no pattern is
/// ever permanently unreachable.
pub struct TestCaseGenerator {
    library: Arc<PatternLibrary>,
    weights: Arc<WeightBook>,
    epsilon: f64,
    rng: Mutex<StdRng>,
}

impl TestCaseGenerator {
    pub fn new(library: Arc<PatternLibrary>, weights: Arc<WeightBook>, epsilon: f64) -> Self {
        Self {
            library,
            weights,
            epsilon,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded constructor for reproducible generation in tests.
    pub fn with_seed(
        library: Arc<PatternLibrary>,
        weights: Arc<WeightBook>,
        epsilon: f64,
        seed: u64,
    ) -> Self {
        Self {
            library,
            weights,
            epsilon,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Generate `n` test cases for a domain by weighted sampling with
    /// replacement. A domain with zero registered patterns yields an empty
    /// vec: that is a signal to widen the pattern library, not a crash.
    pub fn generate(&self, domain: &str, n: usize, cycle_id: &str) -> Vec<TestCase> {
        let patterns = self.library.patterns_for(domain);
        if patterns.is_empty() {
            tracing::warn!(
                domain = %domain,
                "no patterns registered for domain; nothing generated"
            );
            return Vec::new();
        }

        let raw: Vec<f64> = patterns
            .iter()
            .map(|p| self.weights.weight_of(domain, &p.id))
            .collect();
        let clamped = clamp_weights(&raw, self.epsilon);
        let total: f64 = clamped.iter().sum();

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let pattern = &patterns[pick_weighted(&mut rng, &clamped, total)];
            out.push(instantiate(&mut rng, pattern, cycle_id));
        }
        out
    }
}

/// Clamp non-positive weights to epsilon, keeping every pattern reachable.
fn clamp_weights(raw: &[f64], epsilon: f64) -> Vec<f64> {
    raw.iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { epsilon })
        .collect()
}

fn pick_weighted(rng: &mut StdRng, weights: &[f64], total: f64) -> usize {
    if !(total > 0.0) {
        // Degenerate table (e.g. epsilon configured to zero): fall back to
        // uniform so sampling still terminates.
        return rng.gen_range(0..weights.len());
    }
    let mut target = rng.gen_range(0.0..total);
    for (idx, w) in weights.iter().enumerate() {
        if target < *w {
            return idx;
        }
        target -= w;
    }
    weights.len() - 1
}

/// Instantiate one pattern into a concrete test case. The expected-result
/// assertion is derived from the sampled values by `Pattern::derive_expected`,
/// never re-sampled, so expectation and instance cannot disagree.
fn instantiate(rng: &mut StdRng, pattern: &Pattern, cycle_id: &str) -> TestCase {
    let mut values = BTreeMap::new();
    for (field, spec) in &pattern.params {
        values.insert(field.clone(), sample_field(rng, spec));
    }
    let expected_result = pattern.derive_expected(&values);

    TestCase {
        id: Uuid::new_v4().to_string(),
        pattern_id: pattern.id.clone(),
        domain: pattern.domain.clone(),
        values,
        expected_result,
        cycle_id: cycle_id.to_string(),
        created_at: Utc::now(),
    }
}

fn sample_field(rng: &mut StdRng, spec: &ParamSpec) -> FieldValue {
    match spec {
        ParamSpec::IntRange { min, max } => FieldValue::Int(rng.gen_range(*min..=*max)),
        ParamSpec::FloatRange { min, max } => FieldValue::Float(rng.gen_range(*min..=*max)),
        ParamSpec::Choice { options } => {
            FieldValue::Text(options[rng.gen_range(0..options.len())].clone())
        }
        ParamSpec::Const { value } => value.clone(),
        ParamSpec::ExceedsLimit { limit, cap_factor } => {
            // Uniform in (limit, limit * cap_factor]: 1 - U[0,1) lies in (0,1].
            let unit = 1.0 - rng.gen_range(0.0..1.0);
            FieldValue::Float(limit + unit * (cap_factor - 1.0) * limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_keeps_every_pattern_reachable() {
        let clamped = clamp_weights(&[2.0, 0.0, -3.5, f64::NAN], 0.01);
        assert_eq!(clamped[0], 2.0);
        assert!(clamped[1] > 0.0);
        assert!(clamped[2] > 0.0);
        assert!(clamped[3] > 0.0);
    }

    #[test]
    fn weighted_pick_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = vec![0.5, 1.5, 3.0];
        let total: f64 = weights.iter().sum();
        for _ in 0..1000 {
            let idx = pick_weighted(&mut rng, &weights, total);
            assert!(idx < weights.len());
        }
    }
}
