//! Escalation Engine — Deterministic workflow for tier routing
//!
//! Routes a task through resource tiers based on the planner's difficulty
//! estimate and on validation results. The only nondeterminism lives in the
//! collaborators; every routing decision here is a pure function of state.
//!
//! # Escalation Ladder
//!
//! ```text
//! difficulty 1, 2 ──► S (solo)
//!     │
//!     ├─ validation passes → Passed
//!     ├─ validation fails, escalations left → escalate
//!     ▼
//! difficulty 3, 5 ──► M (pair + merge)
//!     │
//!     ▼
//! difficulty 8 ─────► L (team of 3 + merge)
//!     │
//!     ├─ passes → Passed
//!     └─ fails → Exhausted (or retry at L while escalations remain)
//! ```

pub mod engine;
pub mod machine;
pub mod policy;
pub mod state;

pub use engine::{
    Collaborators, EngineConfig, EngineError, FaultKind, FaultRecord, RunMode, RunReport,
    WorkflowEngine,
};
pub use machine::{IllegalTransition, TransitionRecord, WorkflowMachine, WorkflowPhase};
pub use policy::{DifficultyScore, PolicyError, TeamMode, TeamSizes, Tier, TierPolicy};
pub use state::{AttemptOutcome, AttemptRecord, EscalationRecord, RunStatus, WorkflowState};
