//! Workflow State Machine — explicit phases and legal transition guards.
//!
//! Every run starts at `Idle` and ends in exactly one of `Passed`,
//! `Exhausted` or `Faulted`. The engine calls `advance()` to move between
//! phases; each call is checked against the transition table and recorded.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Phases of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Created, nothing done yet.
    Idle,
    /// Asking the planner for a difficulty estimate (once per run).
    Planning,
    /// Choosing the tier for the next attempt.
    Routing,
    /// Workers producing a candidate.
    Producing,
    /// Running the candidate against the test cases.
    Validating,
    /// Moving to the next tier after a failed attempt.
    Escalating,
    /// A candidate passed every test case — terminal.
    Passed,
    /// Escalation bound reached without a passing candidate — terminal.
    Exhausted,
    /// Infrastructure fault or cancellation — terminal.
    Faulted,
}

impl WorkflowPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Exhausted | Self::Faulted)
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Planning => write!(f, "Planning"),
            Self::Routing => write!(f, "Routing"),
            Self::Producing => write!(f, "Producing"),
            Self::Validating => write!(f, "Validating"),
            Self::Escalating => write!(f, "Escalating"),
            Self::Passed => write!(f, "Passed"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}

/// Legal transitions between workflow phases.
///
/// ```text
/// Idle       → Planning | Producing (baseline)
/// Planning   → Routing
/// Routing    → Producing
/// Producing  → Validating | Escalating | Exhausted   (last two: malformed output)
/// Validating → Passed | Escalating | Exhausted
/// Escalating → Routing
/// any non-terminal → Faulted
/// ```
fn is_legal_transition(from: WorkflowPhase, to: WorkflowPhase) -> bool {
    use WorkflowPhase::*;

    if to == Faulted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Planning)
            | (Idle, Producing)
            | (Planning, Routing)
            | (Routing, Producing)
            | (Producing, Validating)
            | (Producing, Escalating)
            | (Producing, Exhausted)
            | (Validating, Passed)
            | (Validating, Escalating)
            | (Validating, Exhausted)
            | (Escalating, Routing)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    /// Attempt number at the time of transition (0 before the first attempt).
    pub iteration: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal workflow transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
}

/// The workflow state machine for one run.
#[derive(Debug)]
pub struct WorkflowMachine {
    current: WorkflowPhase,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl WorkflowMachine {
    pub fn new() -> Self {
        Self {
            current: WorkflowPhase::Idle,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkflowPhase {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to `to`, recording the transition when legal.
    pub fn advance(
        &mut self,
        to: WorkflowPhase,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "Workflow transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Faulted`; legal from every non-terminal phase.
    pub fn fault(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkflowPhase::Faulted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Consume the machine, keeping only its transition log.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// `Idle → Faulted (12ms, 3 transitions) [Planning → Routing → Faulted]`
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            WorkflowPhase::Idle,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !self.transitions.is_empty() {
            let phases: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
            out.push_str(&format!(" [{}]", phases.join(" → ")));
        }
        out
    }
}

impl Default for WorkflowMachine {
    fn default() -> Self {
        Self::new()
    }
}
