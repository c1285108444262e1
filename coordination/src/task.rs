//! Task and Candidate types
//!
//! A [`Task`] is created once at ingestion and never mutated. A [`Candidate`]
//! is one complete proposed solution; every attempt produces a fresh one.

use serde::{Deserialize, Serialize};

use crate::escalation::policy::Tier;

/// One stdin/stdout test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Text fed to the program's standard input
    pub input: String,
    /// Expected standard output (compared after trimming)
    pub output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// A coding task with its held-out test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,
    /// Natural-language problem statement
    pub description: String,
    /// Ordered test cases
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tests: Vec::new(),
        }
    }

    /// Append a test case
    pub fn with_test(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.tests.push(TestCase::new(input, output));
        self
    }

    /// Replace all test cases
    pub fn with_tests(mut self, tests: Vec<TestCase>) -> Self {
        self.tests = tests;
        self
    }
}

/// How a candidate's source was obtained from the worker proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeProvenance {
    /// Single worker, taken verbatim
    Solo,
    /// Produced by the merge collaborator
    Merged,
    /// Selected by majority among identical proposals
    Majority,
    /// Merge step unavailable or disabled; first well-formed proposal used
    FirstProposal,
}

impl std::fmt::Display for MergeProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solo => write!(f, "solo"),
            Self::Merged => write!(f, "merged"),
            Self::Majority => write!(f, "majority"),
            Self::FirstProposal => write!(f, "first_proposal"),
        }
    }
}

/// A complete proposed solution for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Full program source
    pub code: String,
    /// Tier that produced it
    pub tier: Tier,
    /// Number of workers dispatched
    pub worker_count: usize,
    /// Attempt number (1-indexed)
    pub iteration: u32,
    /// How the proposals were combined
    pub provenance: MergeProvenance,
}

impl Candidate {
    pub fn new(
        code: impl Into<String>,
        tier: Tier,
        worker_count: usize,
        iteration: u32,
        provenance: MergeProvenance,
    ) -> Self {
        Self {
            code: code.into(),
            tier,
            worker_count,
            iteration,
            provenance,
        }
    }
}
