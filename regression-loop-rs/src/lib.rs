// regression-loop-rs/src/lib.rs
// Adaptive regression loop: classify change events, generate weighted
// test cases, execute them against the system under test, and feed the
// verdicts back into per-pattern sampling weights.
//
// Design notes:
// - This crate is a pure library crate; there is no HTTP server or
//   standalone binary entrypoint. Callers drive it one cycle at a time.
// - Pattern weights are the only state that outlives a cycle. They are
//   written once per cycle, atomically, after all results are buffered,
//   and persisted through a pluggable key-value store.
// - Domains are data, not types: new domains are added by registering
//   patterns, never by subclassing a generator.

use std::collections::BTreeMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

pub mod adaptation;
pub mod classifier;
pub mod executor;
pub mod generator;
pub mod library;
pub mod model;
pub mod weights;


pub use crate::adaptation::{AdaptationPolicy, FeedbackEngine};
pub use crate::classifier::{DomainClassifier, DomainRule, KeywordClassifier};
pub use crate::executor::{ExecutionEngine, ResultComparator, SutError, SystemUnderTest};
pub use crate::generator::TestCaseGenerator;
pub use crate::library::{Pattern, PatternLibrary, SchemaError};
pub use crate::model::{
    ChangeRecord, CycleSummary, DomainTag, ExecutionResult, TestCase, Verdict,
};
pub use crate::weights::{FileBackedWeightStore, StoreError, WeightBook, WeightStore};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, RegressionLoopError>;

/// Top-level error type for this crate. Only pattern registration and
/// persistence can fail hard; every per-test-case failure is recovered
/// locally and surfaced as an ExecutionResult.
#[derive(Debug, thiserror::Error)]
pub enum RegressionLoopError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for the loop facade. Numeric tuning of the feedback
/// policy lives in [`AdaptationPolicy`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Master switch; a disabled loop classifies nothing and never writes.
    pub enabled: bool,
    /// Base number of cases generated per classified change, scaled by
    /// the tag's confidence (minimum one case per firing tag).
    pub cases_per_change: usize,
    /// Optional hard filter on tag confidence. Off by default: low
    /// confidence normally only biases generation volume downward.
    pub min_confidence: Option<f64>,
    /// Upper bound on concurrent executions within a cycle.
    pub max_concurrency: usize,
    /// Per-case execution deadline; overrun becomes an `error` verdict.
    pub execution_deadline: Duration,
    pub policy: AdaptationPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cases_per_change: 5,
            min_confidence: None,
            max_concurrency: 8,
            execution_deadline: Duration::from_secs(5),
            policy: AdaptationPolicy::default(),
        }
    }
}

impl LoopConfig {
    /// Construct configuration from environment variables.
    ///
    /// Intentionally conservative and never panics; anything unset or
    /// unparsable falls back to the default.
    /// - REGRESSION_LOOP_ENABLED: "0", "false", "no", "off" disable.
    /// - REGRESSION_CASES_PER_CHANGE, REGRESSION_MAX_CONCURRENCY: usize.
    /// - REGRESSION_EXECUTION_DEADLINE_MS: u64 milliseconds.
    /// - REGRESSION_MIN_CONFIDENCE: f64 in [0,1]; absent means no filter.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = match env::var("REGRESSION_LOOP_ENABLED") {
            Ok(val) => {
                let v = val.trim().to_ascii_lowercase();
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => defaults.enabled,
        };

        fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
            env::var(name)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        let min_confidence = env::var("REGRESSION_MIN_CONFIDENCE")
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|c| (0.0..=1.0).contains(c));

        Self {
            enabled,
            cases_per_change: parse_var("REGRESSION_CASES_PER_CHANGE", defaults.cases_per_change),
            min_confidence,
            max_concurrency: parse_var("REGRESSION_MAX_CONCURRENCY", defaults.max_concurrency),
            execution_deadline: Duration::from_millis(parse_var(
                "REGRESSION_EXECUTION_DEADLINE_MS",
                defaults.execution_deadline.as_millis() as u64,
            )),
            policy: AdaptationPolicy::default(),
        }
    }
}

/// Cooperative cancellation for an in-flight cycle. Cancelling prevents
/// the adaptation step, leaving weights exactly as they were at cycle
/// start; already-running executions still drain within their deadlines.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The generation-execution-feedback loop.
///
/// Typical usage (inside an async context):
///
/// ```ignore
/// let mut library = PatternLibrary::new();
/// library.register_all(library::financial_transaction_patterns(&Default::default()))?;
///
/// let looper = RegressionLoop::new(LoopConfig::default(), library, sut).await?;
/// let summary = looper.run_cycle(changes).await?;
/// ```
pub struct RegressionLoop {
    cfg: LoopConfig,
    classifier: Arc<dyn DomainClassifier>,
    generator: TestCaseGenerator,
    executor: ExecutionEngine,
    feedback: FeedbackEngine,
    weights: Arc<WeightBook>,
    cancelled: Arc<AtomicBool>,
}

impl RegressionLoop {
    /// Construct a loop with default components: keyword classifier,
    /// exact-match comparator, file-backed weight store.
    pub async fn new(
        cfg: LoopConfig,
        library: PatternLibrary,
        sut: Arc<dyn SystemUnderTest>,
    ) -> Result<Self> {
        let store: Arc<dyn WeightStore> = Arc::new(FileBackedWeightStore::new_default()?);
        Self::with_components(
            cfg,
            library,
            Arc::new(KeywordClassifier::default()),
            sut,
            ResultComparator::Exact,
            store,
        )
        .await
    }

    /// Construct a loop with explicit collaborators. Persisted weights are
    /// loaded here so the first cycle starts from durable state.
    pub async fn with_components(
        cfg: LoopConfig,
        library: PatternLibrary,
        classifier: Arc<dyn DomainClassifier>,
        sut: Arc<dyn SystemUnderTest>,
        comparator: ResultComparator,
        store: Arc<dyn WeightStore>,
    ) -> Result<Self> {
        let library = Arc::new(library);
        let weights = Arc::new(WeightBook::new());
        weights.replace(store.load().await?);

        let generator = TestCaseGenerator::new(
            Arc::clone(&library),
            Arc::clone(&weights),
            cfg.policy.epsilon,
        );
        let executor = ExecutionEngine::new(
            sut,
            comparator,
            cfg.execution_deadline,
            cfg.max_concurrency,
        );
        let feedback = FeedbackEngine::new(cfg.policy.clone(), Arc::clone(&weights), store);

        Ok(Self {
            cfg,
            classifier,
            generator,
            executor,
            feedback,
            weights,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle for cancelling the in-flight (or next) cycle.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// Read-only view of the current weight table, for inspection.
    pub fn weight_of(&self, domain: &str, pattern_id: &str) -> f64 {
        self.weights.weight_of(domain, pattern_id)
    }

    /// Run one full generation cycle over a batch of change records:
    /// classify, generate, execute, then adapt weights atomically.
    ///
    /// Per-test-case failures never abort the cycle; only persistence of
    /// the final weight state can surface an error here.
    #[instrument(name = "regression_cycle", skip(self, changes), fields(change_count = changes.len()))]
    pub async fn run_cycle(&self, changes: Vec<ChangeRecord>) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let changes_seen = changes.len();

        if !self.cfg.enabled {
            tracing::debug!("regression loop disabled; skipping cycle");
            return Ok(CycleSummary {
                cycle_id,
                started_at,
                finished_at: Utc::now(),
                changes_seen,
                changes_skipped: changes_seen,
                cases_generated: 0,
                domain_counts: BTreeMap::new(),
                weight_deltas: Vec::new(),
                adaptation_applied: false,
            });
        }

        // Classify: accumulate a per-domain generation budget, scaled by
        // tag confidence. Records with no tags are logged and skipped.
        let mut budgets: BTreeMap<String, usize> = BTreeMap::new();
        let mut changes_skipped = 0;
        for change in &changes {
            let mut tags = self.classifier.classify(change);
            if let Some(threshold) = self.cfg.min_confidence {
                tags.retain(|t| t.confidence >= threshold);
            }
            if tags.is_empty() {
                changes_skipped += 1;
                continue;
            }
            for tag in tags {
                let n = ((self.cfg.cases_per_change as f64 * tag.confidence).round() as usize)
                    .max(1);
                *budgets.entry(tag.domain).or_insert(0) += n;
            }
        }

        // Generate: weighted sampling per domain. Empty domains produce
        // nothing; that is a signal to widen the library, not a failure.
        let mut cases = Vec::new();
        for (domain, n) in &budgets {
            cases.extend(self.generator.generate(domain, *n, &cycle_id));
        }
        let cases_generated = cases.len();

        // Execute: bounded parallelism, each case resolving within its
        // deadline. Results are buffered; no weight is touched yet.
        let outcomes = if self.cancelled.load(Ordering::SeqCst) {
            Vec::new()
        } else {
            self.executor.execute_all(cases).await
        };

        let mut domain_counts: BTreeMap<String, model::VerdictCounts> = BTreeMap::new();
        for (case, result) in &outcomes {
            domain_counts
                .entry(case.domain.clone())
                .or_default()
                .record(result.verdict);
        }

        // Adapt: applied once, atomically, and only for uncancelled
        // cycles. A cancelled cycle leaves weights exactly as they were.
        let (weight_deltas, adaptation_applied) = if self.cancelled.load(Ordering::SeqCst) {
            tracing::info!(cycle.id = %cycle_id, "cycle cancelled; adaptation skipped");
            (Vec::new(), false)
        } else {
            let deltas = self.feedback.adapt(&cycle_id, &outcomes).await?;
            (deltas, true)
        };

        let summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            changes_seen,
            changes_skipped,
            cases_generated,
            domain_counts,
            weight_deltas,
            adaptation_applied,
        };

        metrics::increment_counter!("regression_loop_cycles_total");
        tracing::info!(
            cycle.id = %summary.cycle_id,
            changes = summary.changes_seen,
            skipped = summary.changes_skipped,
            cases = summary.cases_generated,
            adapted = summary.adaptation_applied,
            "regression cycle complete"
        );

        Ok(summary)
    }
}
