// regression-loop-rs/src/executor.rs
// Bounded-concurrency execution of test cases against the system under test.
//
// Every execution resolves within the configured deadline: a timeout or a
// collaborator failure becomes a Verdict::Error result, never a propagated
// error or a hang. Results are returned in full so the caller can buffer
// them for end-of-cycle adaptation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::model::{ExecutionResult, TestCase, Verdict};

/// Failure raised by the system-under-test collaborator itself.
#[derive(Debug, thiserror::Error)]
pub enum SutError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Request/response interface to the external system under test.
///
/// Implementations submit the test case's parameters and return the
/// actual-result payload. They do not need their own timeout handling;
/// the engine bounds every call with a deadline.
#[async_trait]
pub trait SystemUnderTest: Send + Sync {
    async fn invoke(&self, case: &TestCase) -> Result<serde_json::Value, SutError>;
}

/// Pluggable comparison between the expected-result assertion and the
/// actual payload.
#[derive(Debug, Clone)]
pub enum ResultComparator {
    /// String equality against the payload (or its JSON rendering).
    Exact,
    /// Both sides parse as numbers within the given tolerance.
    NumericTolerance(f64),
    /// Expected parses as JSON and is structurally equal to the payload.
    Structural,
}

impl ResultComparator {
    pub fn matches(&self, expected: &str, actual: &serde_json::Value) -> bool {
        match self {
            ResultComparator::Exact => match actual.as_str() {
                Some(s) => s == expected,
                None => actual.to_string() == expected,
            },
            ResultComparator::NumericTolerance(tolerance) => {
                let expected_num: Option<f64> = expected.trim().parse().ok();
                let actual_num = actual
                    .as_f64()
                    .or_else(|| actual.as_str().and_then(|s| s.trim().parse().ok()));
                match (expected_num, actual_num) {
                    (Some(e), Some(a)) => (e - a).abs() <= *tolerance,
                    _ => false,
                }
            }
            ResultComparator::Structural => match serde_json::from_str::<serde_json::Value>(expected)
            {
                Ok(expected_value) => expected_value == *actual,
                Err(_) => false,
            },
        }
    }
}

/// Runs test cases against the SUT with bounded parallelism.
pub struct ExecutionEngine {
    sut: Arc<dyn SystemUnderTest>,
    comparator: ResultComparator,
    deadline: Duration,
    max_concurrency: usize,
}

impl ExecutionEngine {
    pub fn new(
        sut: Arc<dyn SystemUnderTest>,
        comparator: ResultComparator,
        deadline: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            sut,
            comparator,
            deadline,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Execute one case; always resolves within the deadline.
    pub async fn execute(&self, case: TestCase) -> (TestCase, ExecutionResult) {
        run_one(
            Arc::clone(&self.sut),
            self.comparator.clone(),
            self.deadline,
            case,
        )
        .await
    }

    /// Execute a batch concurrently under the engine's semaphore bound.
    /// Excess cases queue on the semaphore rather than spawning unbounded
    /// workers. Output order is completion order; callers key results by
    /// test-case id, not position.
    pub async fn execute_all(&self, cases: Vec<TestCase>) -> Vec<(TestCase, ExecutionResult)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for case in cases {
            let semaphore = Arc::clone(&semaphore);
            let sut = Arc::clone(&self.sut);
            let comparator = self.comparator.clone();
            let deadline = self.deadline;
            tasks.spawn(async move {
                match semaphore.acquire_owned().await {
                    Ok(_permit) => run_one(sut, comparator, deadline, case).await,
                    // The semaphore is never closed while tasks hold a
                    // clone; surface it as harness instability if it is.
                    Err(_) => {
                        let result = ExecutionResult {
                            test_case_id: case.id.clone(),
                            verdict: Verdict::Error,
                            observed: Some(json!({ "error": "execution slot unavailable" })),
                            finished_at: Utc::now(),
                        };
                        (case, result)
                    }
                }
            });
        }

        let mut out = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => out.push(pair),
                Err(err) => {
                    tracing::error!(error = %err, "execution task panicked; result dropped");
                }
            }
        }
        out
    }
}

async fn run_one(
    sut: Arc<dyn SystemUnderTest>,
    comparator: ResultComparator,
    deadline: Duration,
    case: TestCase,
) -> (TestCase, ExecutionResult) {
    let outcome = timeout(deadline, sut.invoke(&case)).await;

    let (verdict, observed) = match outcome {
        Err(_elapsed) => {
            tracing::warn!(
                test_case.id = %case.id,
                test_case.pattern = %case.pattern_id,
                deadline_ms = deadline.as_millis() as u64,
                "execution timed out"
            );
            (
                Verdict::Error,
                Some(json!({
                    "error": "timeout",
                    "deadline_ms": deadline.as_millis() as u64,
                })),
            )
        }
        Ok(Err(err)) => {
            tracing::warn!(
                test_case.id = %case.id,
                test_case.pattern = %case.pattern_id,
                error = %err,
                "system under test raised an error"
            );
            (
                Verdict::Error,
                Some(json!({ "error": err.to_string() })),
            )
        }
        Ok(Ok(actual)) => {
            let verdict = if comparator.matches(&case.expected_result, &actual) {
                Verdict::Pass
            } else {
                Verdict::Fail
            };
            (verdict, Some(actual))
        }
    };

    metrics::increment_counter!(
        "regression_loop_executions_total",
        "domain" => case.domain.clone(),
        "verdict" => verdict.to_string()
    );

    let result = ExecutionResult {
        test_case_id: case.id.clone(),
        verdict,
        observed,
        finished_at: Utc::now(),
    };
    (case, result)
}
