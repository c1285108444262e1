//! Collaborator interfaces — Planner, Worker, Merger
//!
//! The engine depends on external model-backed services only through these
//! traits. Implementations may be slow, may fail and may return malformed
//! data; the engine classifies failures via [`CollaboratorError`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::escalation::policy::{DifficultyScore, Tier};

/// Failure returned by any collaborator call.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Planner returned an unparsable plan or a difficulty outside the domain
    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    /// Worker or merger returned empty or unparsable code
    #[error("malformed code: {0}")]
    MalformedCode(String),

    /// Backend could not be reached or raised an error
    #[error("collaborator unreachable: {0}")]
    Unreachable(String),

    /// Call did not finish within its time budget
    #[error("collaborator timed out after {0}s")]
    Timeout(u64),

    /// Run was cancelled while the call was in flight
    #[error("cancelled")]
    Cancelled,
}

impl CollaboratorError {
    /// In-domain output problems, as opposed to infrastructure faults
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedPlan(_) | Self::MalformedCode(_))
    }
}

/// Planner verdict for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub difficulty: DifficultyScore,
    pub rationale: String,
}

/// Everything a worker sees for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkContext {
    /// Task identifier, for logging on the collaborator side
    pub task_id: String,
    /// Tier the worker is operating at
    pub tier: Tier,
    /// Position within the team (0-based)
    pub worker_index: usize,
    /// Team size for this attempt
    pub team_size: usize,
    /// Attempt number (1-indexed)
    pub iteration: u32,
    /// Source of the previous attempt, present on retries
    pub prior_candidate: Option<String>,
}

impl WorkContext {
    pub fn is_retry(&self) -> bool {
        self.prior_candidate.is_some()
    }
}

/// Estimates task difficulty.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, description: &str, task_id: &str) -> Result<Plan, CollaboratorError>;
}

/// Proposes a complete solution.
///
/// `failure_history` holds every failure line recorded so far for the task,
/// oldest first. It is empty on the first attempt.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn propose(
        &self,
        subtask: &str,
        context: &WorkContext,
        failure_history: &[String],
    ) -> Result<String, CollaboratorError>;
}

/// Combines several proposals into one solution.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, subtask: &str, candidates: &[String])
        -> Result<String, CollaboratorError>;
}

/// Await a collaborator call bounded by `timeout` and by `cancel`.
pub async fn call_bounded<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        res = tokio::time::timeout(timeout, call) => match res {
            Ok(inner) => inner,
            Err(_) => Err(CollaboratorError::Timeout(timeout.as_secs())),
        },
    }
}

/// Reject code that is empty after trimming.
pub fn ensure_code(code: String) -> Result<String, CollaboratorError> {
    if code.trim().is_empty() {
        Err(CollaboratorError::MalformedCode(
            "empty content after trimming".to_string(),
        ))
    } else {
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_classification() {
        assert!(CollaboratorError::MalformedPlan("x".into()).is_malformed());
        assert!(CollaboratorError::MalformedCode("x".into()).is_malformed());
        assert!(!CollaboratorError::Unreachable("x".into()).is_malformed());
        assert!(!CollaboratorError::Timeout(3).is_malformed());
        assert!(!CollaboratorError::Cancelled.is_malformed());
    }

    #[tokio::test]
    async fn test_call_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CollaboratorError>(())
        };
        let res = call_bounded(slow, Duration::from_millis(50), &CancellationToken::new()).await;
        assert!(matches!(res, Err(CollaboratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_call_bounded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let never = std::future::pending::<Result<(), CollaboratorError>>();
        let res = call_bounded(never, Duration::from_secs(5), &cancel).await;
        assert!(matches!(res, Err(CollaboratorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_call_bounded_passes_result_through() {
        let res = call_bounded(
            async { Ok::<_, CollaboratorError>(7) },
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(res.unwrap(), 7);
    }

    #[test]
    fn test_ensure_code() {
        assert!(ensure_code("print(1)".into()).is_ok());
        assert!(matches!(
            ensure_code("  \n\t ".into()),
            Err(CollaboratorError::MalformedCode(_))
        ));
    }
}
