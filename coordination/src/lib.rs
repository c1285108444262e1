//! Stepladder Coordination Library
//!
//! The adaptive task-routing and validation engine:
//! - Tier policy mapping story-point difficulty to a resource tier
//! - Worker coordination (solo, pair, team) with pluggable merge
//! - Sandboxed stdin/stdout validation of candidate programs
//! - A workflow state machine that escalates on failure under a hard bound
//!
//! # Workflow
//!
//! ```text
//! Task ─► Planner ─► TierPolicy ─► WorkerCoordinator ─► Validator
//!                        ▲                                  │
//!                        └──────── escalate (bounded) ◄─────┘
//! ```
//!
//! Model-backed collaborators are reached only through the [`Planner`],
//! [`Worker`] and [`Merger`] traits; this crate makes no network calls.
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::{Collaborators, EngineConfig, RunMode, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(collaborators, EngineConfig::default())?;
//! let report = engine.run(&task, RunMode::Adaptive, &cancel).await;
//! println!("{}", report.summary());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod collaborators;
pub mod decode;
pub mod ensemble;
pub mod escalation;
pub mod task;
pub mod verifier;

// Re-export collaborator interfaces
pub use collaborators::{
    call_bounded, ensure_code, CollaboratorError, Merger, Plan, Planner, WorkContext, Worker,
};

// Re-export decoding helpers
pub use decode::{
    decode_code, decode_plan, extract_json_object, CodeResponse, DecodeError, PlanResponse,
};

// Re-export worker coordination types
pub use ensemble::{
    CoordinatorError, MergePolicy, ProduceRequest, TierWorkers, VoteOutcome, WorkerCoordinator,
};

// Re-export workflow types
pub use escalation::{
    AttemptOutcome, AttemptRecord, Collaborators, DifficultyScore, EngineConfig, EngineError,
    EscalationRecord, FaultKind, FaultRecord, PolicyError, RunMode, RunReport, RunStatus,
    TeamMode, TeamSizes, Tier, TierPolicy, TransitionRecord, WorkflowEngine, WorkflowPhase,
};

// Re-export task types
pub use task::{Candidate, MergeProvenance, Task, TestCase};

// Re-export verifier types
pub use verifier::{
    CaseOutcome, ExecutionOutcome, ExecutionStatus, Sandbox, SandboxConfig, ValidationReport,
    Validator,
};
