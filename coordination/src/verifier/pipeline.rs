//! Validator — run a candidate against every test case
//!
//! Cases are executed through the [`Sandbox`] with bounded parallelism and
//! never short-circuit: every case runs and every failure is reported.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::report::{CaseOutcome, ValidationReport};
use super::sandbox::{ExecutionStatus, Sandbox, SandboxConfig};
use crate::task::TestCase;

/// Deterministic stdin/stdout validator
#[derive(Debug, Clone)]
pub struct Validator {
    sandbox: Arc<Sandbox>,
}

impl Validator {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            sandbox: Arc::new(Sandbox::new(config)),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        self.sandbox.config()
    }

    /// Validate `code` against `tests`.
    ///
    /// An empty test list passes. Sandbox failures become test failures;
    /// this never returns an error.
    pub async fn validate(
        &self,
        code: &str,
        tests: &[TestCase],
        cancel: &CancellationToken,
    ) -> ValidationReport {
        let start = Instant::now();
        if tests.is_empty() {
            debug!("No test cases, candidate passes by definition");
            return ValidationReport::from_cases(Vec::new(), 0);
        }

        let timeout = self.sandbox.config().timeout();
        let parallel = self.sandbox.config().max_parallel_cases.max(1);
        let sem = Arc::new(Semaphore::new(parallel));
        let code: Arc<str> = Arc::from(code);
        let mut join_set: JoinSet<CaseOutcome> = JoinSet::new();

        for (i, case) in tests.iter().enumerate() {
            let sem = sem.clone();
            let sandbox = self.sandbox.clone();
            let code = code.clone();
            let case = case.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                // The semaphore is never closed; a failed acquire just runs unthrottled.
                let _permit = sem.acquire_owned().await.ok();
                run_case(&sandbox, &code, i + 1, &case, timeout, &cancel).await
            });
        }

        let mut cases = Vec::with_capacity(tests.len());
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(outcome) => cases.push(outcome),
                Err(e) => warn!("Test case task aborted: {e}"),
            }
        }

        // A panicked case task still counts as a failure at its index.
        for (i, case) in tests.iter().enumerate() {
            let index = i + 1;
            if !cases.iter().any(|c| c.index == index) {
                cases.push(CaseOutcome {
                    index,
                    passed: false,
                    expected: case.output.trim().to_string(),
                    actual: String::new(),
                    status: ExecutionStatus::LaunchFailed,
                    error: Some("test case task aborted".to_string()),
                    duration_ms: 0,
                });
            }
        }

        let report = ValidationReport::from_cases(cases, start.elapsed().as_millis() as u64);
        info!(
            passed = report.passed,
            failures = report.failures.len(),
            cases = report.cases_total(),
            duration_ms = report.total_duration_ms,
            "Validation finished"
        );
        report
    }
}

async fn run_case(
    sandbox: &Sandbox,
    code: &str,
    index: usize,
    case: &TestCase,
    timeout: Duration,
    cancel: &CancellationToken,
) -> CaseOutcome {
    let exec = sandbox.run(code, &case.input, timeout, cancel).await;
    let expected = case.output.trim().to_string();

    if !exec.ok {
        debug!(index, status = ?exec.status, error = %exec.error, "Test case execution failed");
        return CaseOutcome {
            index,
            passed: false,
            expected,
            actual: String::new(),
            status: exec.status,
            error: Some(exec.error),
            duration_ms: exec.duration_ms,
        };
    }

    let actual = exec.stdout.trim().to_string();
    let passed = actual == expected;
    debug!(index, passed, "Test case compared");
    CaseOutcome {
        index,
        passed,
        expected,
        actual,
        status: exec.status,
        error: None,
        duration_ms: exec.duration_ms,
    }
}
