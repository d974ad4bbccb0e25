// regression-loop-rs/src/adaptation.rs
// End-of-cycle weight adaptation from buffered execution results.
//
// Policy: bounded multiplicative steps. Pass grows a weight (the pattern
// exercises a stable path), fail shrinks it only slightly (a failing
// pattern is high-value for regression testing), and repeated errors for
// the same pattern shrink it progressively harder (the pattern itself may
// be malformed). Every step is clamped, and the whole cycle's updates are
// applied in one atomic replacement under a single-writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::model::{ExecutionResult, TestCase, Verdict, WeightDelta};
use crate::weights::{StoreError, WeightBook, WeightKey, WeightStore, DEFAULT_WEIGHT};

/// Tunable constants of the adaptation policy. The exact growth/decay
/// values are configuration, not fixed law; defaults are conservative.
#[derive(Debug, Clone)]
pub struct AdaptationPolicy {
    /// Multiplier applied on a pass. Must be > 1.
    pub pass_growth: f64,
    /// Multiplier applied on a fail. Must be in (0, 1); kept close to 1
    /// because failing patterns are exactly the ones worth re-running.
    pub fail_decay: f64,
    /// Base multiplier applied on an error, raised to the k-th power for
    /// the k-th error of the same pattern within a cycle.
    pub error_decay: f64,
    /// Lower bound on the magnitude of any applied step.
    pub min_step: f64,
    /// Upper bound on the magnitude of any applied step.
    pub max_step: f64,
    /// Tighter per-step cap for error verdicts; harness instability is not
    /// strong evidence against a pattern. Must be below `max_step`.
    pub error_step_cap: f64,
    /// Floor for any weight; also the clamp for non-positive weights at
    /// sampling time, so no pattern is permanently unreachable.
    pub epsilon: f64,
    /// Ceiling for any weight, preventing one pattern from crowding out
    /// the rest of its domain.
    pub max_weight: f64,
}

impl Default for AdaptationPolicy {
    fn default() -> Self {
        Self {
            pass_growth: 1.10,
            fail_decay: 0.95,
            error_decay: 0.98,
            min_step: 0.0,
            max_step: 0.25,
            error_step_cap: 0.05,
            epsilon: 0.01,
            max_weight: 8.0,
        }
    }
}

/// Applies cycle outcomes to the shared weight table and persists them.
pub struct FeedbackEngine {
    policy: AdaptationPolicy,
    weights: Arc<WeightBook>,
    store: Arc<dyn WeightStore>,
    /// Serializes adaptation across cycles: a second caller waits here
    /// rather than interleaving or dropping its update.
    writer: Mutex<()>,
}

impl FeedbackEngine {
    pub fn new(
        policy: AdaptationPolicy,
        weights: Arc<WeightBook>,
        store: Arc<dyn WeightStore>,
    ) -> Self {
        Self {
            policy,
            weights,
            store,
            writer: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &AdaptationPolicy {
        &self.policy
    }

    /// Apply one cycle's buffered outcomes.
    ///
    /// All deltas are computed against a snapshot, then installed in a
    /// single table replacement and flushed to the store. Concurrent
    /// generation never observes a partially-updated table.
    pub async fn adapt(
        &self,
        cycle_id: &str,
        outcomes: &[(TestCase, ExecutionResult)],
    ) -> Result<Vec<WeightDelta>, StoreError> {
        let _writer = self.writer.lock().await;

        let before = self.weights.snapshot();
        let mut working = before.clone();
        let mut error_counts: HashMap<WeightKey, u32> = HashMap::new();

        for (case, result) in outcomes {
            let key: WeightKey = (case.domain.clone(), case.pattern_id.clone());
            let current = working.get(&key).copied().unwrap_or(DEFAULT_WEIGHT);

            let (factor, step_cap) = match result.verdict {
                Verdict::Pass => (self.policy.pass_growth, self.policy.max_step),
                Verdict::Fail => (self.policy.fail_decay, self.policy.max_step),
                Verdict::Error => {
                    let count = error_counts.entry(key.clone()).or_insert(0);
                    *count += 1;
                    (
                        self.policy.error_decay.powi(*count as i32),
                        self.policy.error_step_cap,
                    )
                }
            };

            let next = step(current, factor, &self.policy, step_cap);
            working.insert(key, next);
        }

        let deltas: Vec<WeightDelta> = working
            .iter()
            .filter_map(|((domain, pattern_id), new_weight)| {
                let old_weight = before.get(&(domain.clone(), pattern_id.clone())).copied();
                let old = old_weight.unwrap_or(DEFAULT_WEIGHT);
                if old_weight.is_none() || (old - new_weight).abs() > f64::EPSILON {
                    Some(WeightDelta {
                        domain: domain.clone(),
                        pattern_id: pattern_id.clone(),
                        old_weight: old,
                        new_weight: *new_weight,
                    })
                } else {
                    None
                }
            })
            .collect();

        self.weights.replace(working);
        if let Err(err) = self.store.flush(&self.weights.snapshot()).await {
            // Keep the in-memory state; surface the persistence failure.
            tracing::error!(error = %err, cycle.id = %cycle_id, "weight flush failed");
            return Err(err);
        }

        for delta in &deltas {
            tracing::debug!(
                cycle.id = %cycle_id,
                domain = %delta.domain,
                pattern = %delta.pattern_id,
                old = delta.old_weight,
                new = delta.new_weight,
                "pattern weight adjusted"
            );
        }
        metrics::increment_counter!("regression_loop_adaptations_total");

        Ok(deltas)
    }
}

/// One bounded multiplicative step. The applied delta magnitude is clamped
/// to [min_step, step_cap] and the resulting weight to [epsilon, max_weight].
fn step(current: f64, factor: f64, policy: &AdaptationPolicy, step_cap: f64) -> f64 {
    let raw_delta = current * factor - current;
    if raw_delta == 0.0 {
        return current.clamp(policy.epsilon, policy.max_weight);
    }

    let magnitude = raw_delta.abs().clamp(policy.min_step, step_cap);
    let delta = magnitude.copysign(raw_delta);
    (current + delta).clamp(policy.epsilon, policy.max_weight)
}
