//! Verifier Module — Sandboxed stdin/stdout validation
//!
//! The Validator is the ONLY source of truth for candidate correctness. It
//! runs each test case through the Sandbox Executor and compares trimmed
//! output against the expected text.
//!
//! # Pipeline
//!
//! ```text
//! candidate ─┬─ case 1 → sandbox(stdin₁) → compare ─┐
//!            ├─ case 2 → sandbox(stdin₂) → compare ─┼→ ValidationReport
//!            └─ case N → sandbox(stdinₙ) → compare ─┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::verifier::{SandboxConfig, Validator};
//!
//! let validator = Validator::new(SandboxConfig::default());
//! let report = validator.validate(&code, &task.tests, &cancel).await;
//! println!("{}", report.summary());
//! ```

pub mod pipeline;
pub mod report;
pub mod sandbox;

pub use pipeline::Validator;
pub use report::{CaseOutcome, ValidationReport};
pub use sandbox::{ExecutionOutcome, ExecutionStatus, Sandbox, SandboxConfig};
