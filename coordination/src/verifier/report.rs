//! Validation Report — per-case outcomes and the aggregated verdict
//!
//! Failure lines use a fixed, 1-based format that is fed back to workers on
//! retry:
//!
//! ```text
//! Test 1: expected '12', got '0'
//! Test 2: execution error - timed out after 10.0s
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sandbox::ExecutionStatus;

/// Result of running one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutcome {
    /// 1-based test index
    pub index: usize,
    /// Whether the trimmed output matched
    pub passed: bool,
    /// Expected output, trimmed
    pub expected: String,
    /// Actual output, trimmed (empty when execution failed)
    pub actual: String,
    /// How the sandboxed process ended
    pub status: ExecutionStatus,
    /// Execution error, when the process did not exit cleanly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CaseOutcome {
    /// Human-readable failure line, `None` when the case passed
    pub fn failure_line(&self) -> Option<String> {
        if self.passed {
            return None;
        }
        Some(match &self.error {
            Some(error) => format!("Test {}: execution error - {}", self.index, error),
            None => format!(
                "Test {}: expected '{}', got '{}'",
                self.index, self.expected, self.actual
            ),
        })
    }
}

/// Complete validation result for one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: DateTime<Utc>,
    /// True iff there are zero failures
    pub passed: bool,
    /// Failure lines ordered by test index
    pub failures: Vec<String>,
    /// Per-case outcomes ordered by test index
    pub cases: Vec<CaseOutcome>,
    pub total_duration_ms: u64,
}

impl ValidationReport {
    /// Aggregate case outcomes. Cases are sorted by index first, so the
    /// result does not depend on completion order.
    pub fn from_cases(mut cases: Vec<CaseOutcome>, total_duration_ms: u64) -> Self {
        cases.sort_by_key(|c| c.index);
        let failures: Vec<String> = cases.iter().filter_map(CaseOutcome::failure_line).collect();
        Self {
            timestamp: Utc::now(),
            passed: failures.is_empty(),
            failures,
            cases,
            total_duration_ms,
        }
    }

    pub fn cases_total(&self) -> usize {
        self.cases.len()
    }

    pub fn cases_passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    /// The sandbox could not start a single process
    pub fn all_launch_failed(&self) -> bool {
        !self.cases.is_empty()
            && self
                .cases
                .iter()
                .all(|c| c.status == ExecutionStatus::LaunchFailed)
    }

    /// At least one case was cut short by cancellation
    pub fn was_cancelled(&self) -> bool {
        self.cases
            .iter()
            .any(|c| c.status == ExecutionStatus::Cancelled)
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} ({}/{} cases, {}ms)",
            if self.passed { "PASS" } else { "FAIL" },
            self.cases_passed(),
            self.cases_total(),
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(index: usize, passed: bool, actual: &str, error: Option<&str>) -> CaseOutcome {
        CaseOutcome {
            index,
            passed,
            expected: "12".to_string(),
            actual: actual.to_string(),
            status: if error.is_some() {
                ExecutionStatus::NonZeroExit { code: Some(1) }
            } else {
                ExecutionStatus::Succeeded
            },
            error: error.map(str::to_string),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_failure_line_formats() {
        assert_eq!(
            case(1, false, "0", None).failure_line().unwrap(),
            "Test 1: expected '12', got '0'"
        );
        assert_eq!(
            case(3, false, "", Some("boom")).failure_line().unwrap(),
            "Test 3: execution error - boom"
        );
        assert!(case(2, true, "12", None).failure_line().is_none());
    }

    #[test]
    fn test_report_orders_by_index() {
        let report = ValidationReport::from_cases(
            vec![
                case(3, false, "1", None),
                case(1, false, "2", None),
                case(2, true, "12", None),
            ],
            5,
        );
        assert!(!report.passed);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].starts_with("Test 1:"));
        assert!(report.failures[1].starts_with("Test 3:"));
        assert_eq!(report.cases_passed(), 1);
        assert_eq!(report.summary(), "FAIL (1/3 cases, 5ms)");
    }

    #[test]
    fn test_empty_report_passes() {
        let report = ValidationReport::from_cases(Vec::new(), 0);
        assert!(report.passed);
        assert!(report.failures.is_empty());
        assert!(!report.all_launch_failed());
    }

    #[test]
    fn test_all_launch_failed() {
        let mut a = case(1, false, "", Some("no interpreter"));
        a.status = ExecutionStatus::LaunchFailed;
        let mut b = a.clone();
        b.index = 2;
        let report = ValidationReport::from_cases(vec![a.clone(), b], 0);
        assert!(report.all_launch_failed());

        let report = ValidationReport::from_cases(vec![a, case(2, true, "12", None)], 0);
        assert!(!report.all_launch_failed());
    }
}
