//! Stepladder: compare a single-agent baseline against adaptive
//! tier escalation on stdin/stdout coding tasks.
//!
//! The engine lives in the `coordination` crate; this crate supplies the
//! model-backed collaborators, configuration, task loading, reporting and
//! the batch runner used by the `stepladder` binary.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod llm;
pub mod prompts;
pub mod report;
pub mod runner;
pub mod tasks;

pub use config::{ModelConfig, Preset, StepladderConfig};
pub use llm::{build_collaborators, ChatBackend, ChatClient, ChatMessage};
pub use report::ComparisonSummary;
pub use runner::{run_batch, verify_references, BatchOptions, ModeSelection, VerifyOutcome};
pub use tasks::{LoadedTask, TaskError, TaskSource};
