//! Workflow State — attempt history and escalation bookkeeping for one run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::Tier;
use crate::task::Candidate;
use crate::verifier::ValidationReport;

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Passed,
    Exhausted,
    Faulted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// Result of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Candidate produced, validation not finished
    Pending,
    /// Every test case passed
    Passed,
    /// At least one test case failed
    Failed,
    /// Workers returned no usable candidate
    Malformed,
}

/// Record of a single attempt (one iteration)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Which iteration this was (1-indexed)
    pub iteration: u32,
    /// Tier that produced the candidate
    pub tier: Tier,
    /// The candidate, absent when output was malformed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Candidate>,
    pub outcome: AttemptOutcome,
    /// Failure lines from this attempt, ordered by test index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    pub cases_passed: usize,
    pub cases_total: usize,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn passed(&self) -> bool {
        self.outcome == AttemptOutcome::Passed
    }
}

/// Record of an escalation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub from_tier: Tier,
    pub to_tier: Tier,
    /// Iteration that failed and triggered the escalation
    pub at_iteration: u32,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Mutable orchestration state owned by the engine for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: String,
    /// Tier of the current (or last) attempt, `None` before routing
    pub current_tier: Option<Tier>,
    /// Failed validations that led to a retry
    pub escalation_count: u32,
    pub status: RunStatus,
    /// Every failure line so far, oldest first
    pub failure_history: Vec<String>,
    /// Append-only attempt log
    pub attempts: Vec<AttemptRecord>,
    pub escalations: Vec<EscalationRecord>,
}

impl WorkflowState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            current_tier: None,
            escalation_count: 0,
            status: RunStatus::Running,
            failure_history: Vec::new(),
            attempts: Vec::new(),
            escalations: Vec::new(),
        }
    }

    /// Number the next attempt will carry (1-indexed)
    pub fn next_iteration(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Candidate of the most recent attempt that produced one
    pub fn latest_candidate(&self) -> Option<&Candidate> {
        self.attempts.iter().rev().find_map(|a| a.candidate.as_ref())
    }

    /// Candidate of the last attempt, if it still awaits validation.
    pub fn pending_candidate(&self) -> Option<&Candidate> {
        self.attempts
            .last()
            .filter(|a| a.outcome == AttemptOutcome::Pending)
            .and_then(|a| a.candidate.as_ref())
    }

    /// Append a pending attempt for a freshly produced candidate.
    pub fn push_pending(&mut self, candidate: Candidate) {
        self.current_tier = Some(candidate.tier);
        self.attempts.push(AttemptRecord {
            iteration: candidate.iteration,
            tier: candidate.tier,
            candidate: Some(candidate),
            outcome: AttemptOutcome::Pending,
            failures: Vec::new(),
            cases_passed: 0,
            cases_total: 0,
            timestamp: Utc::now(),
        });
    }

    /// Finalise the pending attempt with its validation result.
    ///
    /// Returns false when there is no pending attempt.
    pub fn finalize_attempt(&mut self, report: &ValidationReport) -> bool {
        let Some(attempt) = self
            .attempts
            .last_mut()
            .filter(|a| a.outcome == AttemptOutcome::Pending)
        else {
            return false;
        };
        attempt.outcome = if report.passed {
            AttemptOutcome::Passed
        } else {
            AttemptOutcome::Failed
        };
        attempt.failures = report.failures.clone();
        attempt.cases_passed = report.cases_passed();
        attempt.cases_total = report.cases_total();
        self.failure_history.extend(report.failures.iter().cloned());
        true
    }

    /// Record an attempt whose workers produced nothing usable.
    pub fn record_malformed(&mut self, tier: Tier, reason: &str) {
        let iteration = self.next_iteration();
        let line = format!("Attempt {iteration}: malformed output - {reason}");
        self.current_tier = Some(tier);
        self.attempts.push(AttemptRecord {
            iteration,
            tier,
            candidate: None,
            outcome: AttemptOutcome::Malformed,
            failures: vec![line.clone()],
            cases_passed: 0,
            cases_total: 0,
            timestamp: Utc::now(),
        });
        self.failure_history.push(line);
    }

    /// Move to `to`, consuming one escalation slot.
    pub fn escalate(&mut self, to: Tier, reason: impl Into<String>) {
        let from = self.current_tier.unwrap_or(to);
        self.escalations.push(EscalationRecord {
            from_tier: from,
            to_tier: to,
            at_iteration: self.attempts.len() as u32,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        self.escalation_count += 1;
        self.current_tier = Some(to);
    }

    /// Tier of the attempt that passed, if any
    pub fn winning_tier(&self) -> Option<Tier> {
        self.attempts.iter().find(|a| a.passed()).map(|a| a.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::MergeProvenance;
    use crate::verifier::{CaseOutcome, ExecutionStatus};

    fn candidate(tier: Tier, iteration: u32) -> Candidate {
        Candidate::new("print(0)", tier, 1, iteration, MergeProvenance::Solo)
    }

    fn report(failures: &[(usize, &str)], total: usize) -> ValidationReport {
        let cases = (1..=total)
            .map(|index| {
                let actual = failures
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, a)| a.to_string());
                CaseOutcome {
                    index,
                    passed: actual.is_none(),
                    expected: "12".to_string(),
                    actual: actual.unwrap_or_else(|| "12".to_string()),
                    status: ExecutionStatus::Succeeded,
                    error: None,
                    duration_ms: 1,
                }
            })
            .collect();
        ValidationReport::from_cases(cases, 1)
    }

    #[test]
    fn test_new_state() {
        let state = WorkflowState::new("t1");
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.next_iteration(), 1);
        assert!(state.latest_candidate().is_none());
        assert!(state.winning_tier().is_none());
    }

    #[test]
    fn test_failed_then_passed_attempts() {
        let mut state = WorkflowState::new("t1");
        state.push_pending(candidate(Tier::S, 1));
        assert!(state.finalize_attempt(&report(&[(1, "0")], 2)));
        assert_eq!(state.attempts[0].outcome, AttemptOutcome::Failed);
        assert_eq!(state.failure_history, vec!["Test 1: expected '12', got '0'"]);

        state.escalate(Tier::M, "1 failure");
        assert_eq!(state.escalation_count, 1);
        assert_eq!(state.escalations[0].from_tier, Tier::S);
        assert_eq!(state.escalations[0].at_iteration, 1);

        state.push_pending(candidate(Tier::M, 2));
        assert!(state.finalize_attempt(&report(&[], 2)));
        assert_eq!(state.winning_tier(), Some(Tier::M));
        assert_eq!(state.attempts[1].cases_passed, 2);
        // failure history is not touched by a passing attempt
        assert_eq!(state.failure_history.len(), 1);
    }

    #[test]
    fn test_finalize_without_pending_is_rejected() {
        let mut state = WorkflowState::new("t1");
        assert!(!state.finalize_attempt(&report(&[], 1)));
        state.push_pending(candidate(Tier::S, 1));
        assert!(state.pending_candidate().is_some());
        assert!(state.finalize_attempt(&report(&[], 1)));
        assert!(state.pending_candidate().is_none());
        assert!(state.latest_candidate().is_some());
        assert!(!state.finalize_attempt(&report(&[], 1)));
    }

    #[test]
    fn test_malformed_attempt_feeds_history() {
        let mut state = WorkflowState::new("t1");
        state.record_malformed(Tier::S, "empty content after trimming");
        assert_eq!(state.attempts[0].outcome, AttemptOutcome::Malformed);
        assert!(state.attempts[0].candidate.is_none());
        assert_eq!(
            state.failure_history[0],
            "Attempt 1: malformed output - empty content after trimming"
        );
        assert_eq!(state.next_iteration(), 2);
    }
}
