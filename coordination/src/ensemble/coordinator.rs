//! Worker Coordinator — dispatch a subtask to a solo worker, a pair or a team
//!
//! All workers in a pair/team receive the same subtask and context and run
//! concurrently; the coordinator waits for every one of them before merging.
//! It never touches workflow state: each call returns a fresh [`Candidate`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::voting::{majority_vote, MergePolicy};
use crate::collaborators::{
    call_bounded, ensure_code, CollaboratorError, Merger, WorkContext, Worker,
};
use crate::escalation::policy::{Tier, TierPolicy};
use crate::task::{Candidate, MergeProvenance};

/// Error type for coordinator operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    /// Every proposal was empty or undecodable
    #[error("all {count} proposal(s) malformed: {reason}")]
    AllMalformed { count: usize, reason: String },

    /// A worker could not be reached, raised an error or timed out
    #[error("worker {index} at tier {tier} failed: {source}")]
    Worker {
        tier: Tier,
        index: usize,
        source: CollaboratorError,
    },

    #[error("cancelled")]
    Cancelled,
}

impl CoordinatorError {
    /// Malformed output counts as an attempt failure, not a fault
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::AllMalformed { .. })
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// One worker per tier. A pair/team at a tier calls the same worker N times.
#[derive(Clone)]
pub struct TierWorkers {
    pub small: Arc<dyn Worker>,
    pub medium: Arc<dyn Worker>,
    pub large: Arc<dyn Worker>,
}

impl TierWorkers {
    /// The same worker at every tier
    pub fn uniform(worker: Arc<dyn Worker>) -> Self {
        Self {
            small: worker.clone(),
            medium: worker.clone(),
            large: worker,
        }
    }

    pub fn for_tier(&self, tier: Tier) -> &Arc<dyn Worker> {
        match tier {
            Tier::S => &self.small,
            Tier::M => &self.medium,
            Tier::L => &self.large,
        }
    }
}

impl std::fmt::Debug for TierWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierWorkers").finish_non_exhaustive()
    }
}

/// Input for one Producing step
#[derive(Debug, Clone, Copy)]
pub struct ProduceRequest<'a> {
    pub task_id: &'a str,
    pub subtask: &'a str,
    pub tier: Tier,
    /// Attempt number (1-indexed)
    pub iteration: u32,
    /// Every failure line recorded so far, oldest first
    pub failure_history: &'a [String],
    /// Source of the previous attempt
    pub prior_candidate: Option<&'a str>,
}

/// Solo/pair/team dispatcher with a pluggable merge step
pub struct WorkerCoordinator {
    workers: TierWorkers,
    merger: Option<Arc<dyn Merger>>,
    policy: TierPolicy,
    merge_policy: MergePolicy,
    call_timeout: Duration,
}

impl WorkerCoordinator {
    pub fn new(
        workers: TierWorkers,
        merger: Option<Arc<dyn Merger>>,
        policy: TierPolicy,
        merge_policy: MergePolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            workers,
            merger,
            policy,
            merge_policy,
            call_timeout,
        }
    }

    /// Produce a candidate at `request.tier` with the tier's team size.
    pub async fn produce(
        &self,
        request: &ProduceRequest<'_>,
        cancel: &CancellationToken,
    ) -> CoordinatorResult<Candidate> {
        let worker = self.workers.for_tier(request.tier);
        let team_size = self.policy.team_size(request.tier);
        self.produce_with(worker, team_size, request, cancel).await
    }

    /// Produce a candidate with an explicit worker and team size.
    pub async fn produce_with(
        &self,
        worker: &Arc<dyn Worker>,
        team_size: usize,
        request: &ProduceRequest<'_>,
        cancel: &CancellationToken,
    ) -> CoordinatorResult<Candidate> {
        let team_size = team_size.max(1);
        info!(
            task_id = request.task_id,
            tier = %request.tier,
            team_size,
            iteration = request.iteration,
            "Dispatching workers"
        );

        let calls = (0..team_size).map(|index| {
            let context = WorkContext {
                task_id: request.task_id.to_string(),
                tier: request.tier,
                worker_index: index,
                team_size,
                iteration: request.iteration,
                prior_candidate: request.prior_candidate.map(str::to_string),
            };
            let worker = worker.clone();
            async move {
                let proposal = call_bounded(
                    async { worker.propose(request.subtask, &context, request.failure_history).await },
                    self.call_timeout,
                    cancel,
                )
                .await;
                proposal.and_then(ensure_code)
            }
        });
        let results = join_all(calls).await;

        let mut proposals = Vec::with_capacity(team_size);
        let mut last_malformed = String::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(code) => proposals.push(code),
                Err(e) if e.is_malformed() => {
                    warn!(index, tier = %request.tier, "Dropping malformed proposal: {e}");
                    last_malformed = e.to_string();
                }
                Err(CollaboratorError::Cancelled) => return Err(CoordinatorError::Cancelled),
                Err(source) => {
                    return Err(CoordinatorError::Worker {
                        tier: request.tier,
                        index,
                        source,
                    })
                }
            }
        }

        if proposals.is_empty() {
            return Err(CoordinatorError::AllMalformed {
                count: team_size,
                reason: last_malformed,
            });
        }

        if team_size == 1 {
            let code = proposals.swap_remove(0);
            return Ok(Candidate::new(
                code,
                request.tier,
                team_size,
                request.iteration,
                MergeProvenance::Solo,
            ));
        }

        let (code, provenance) = self.merge(request, proposals, cancel).await?;
        debug!(%provenance, "Proposals merged");
        Ok(Candidate::new(
            code,
            request.tier,
            team_size,
            request.iteration,
            provenance,
        ))
    }

    /// Combine well-formed proposals. Never yields empty code.
    async fn merge(
        &self,
        request: &ProduceRequest<'_>,
        mut proposals: Vec<String>,
        cancel: &CancellationToken,
    ) -> CoordinatorResult<(String, MergeProvenance)> {
        if proposals.len() == 1 {
            return Ok((proposals.swap_remove(0), MergeProvenance::FirstProposal));
        }

        match self.merge_policy {
            MergePolicy::First => Ok((proposals.swap_remove(0), MergeProvenance::FirstProposal)),
            MergePolicy::Majority => match majority_vote(&proposals) {
                Some(outcome) => Ok((
                    proposals.swap_remove(outcome.winner),
                    MergeProvenance::Majority,
                )),
                None => Ok((proposals.swap_remove(0), MergeProvenance::FirstProposal)),
            },
            MergePolicy::Delegate => {
                let Some(merger) = &self.merger else {
                    debug!("No merger configured, using first proposal");
                    return Ok((proposals.swap_remove(0), MergeProvenance::FirstProposal));
                };
                let merged = call_bounded(
                    async { merger.merge(request.subtask, &proposals).await },
                    self.call_timeout,
                    cancel,
                )
                .await
                .and_then(ensure_code);

                match merged {
                    Ok(code) => Ok((code, MergeProvenance::Merged)),
                    Err(CollaboratorError::Cancelled) => Err(CoordinatorError::Cancelled),
                    Err(e) => {
                        warn!(
                            task_id = request.task_id,
                            "Merge failed, falling back to first proposal: {e}"
                        );
                        Ok((proposals.swap_remove(0), MergeProvenance::FirstProposal))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns scripted proposals in call order and records every context.
    struct ScriptedWorker {
        replies: Mutex<Vec<Result<String, CollaboratorError>>>,
        seen: Mutex<Vec<(WorkContext, Vec<String>)>>,
    }

    impl ScriptedWorker {
        fn new(replies: Vec<Result<String, CollaboratorError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn propose(
            &self,
            _subtask: &str,
            context: &WorkContext,
            failure_history: &[String],
        ) -> Result<String, CollaboratorError> {
            self.seen
                .lock()
                .unwrap()
                .push((context.clone(), failure_history.to_vec()));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok("print(0)".to_string())
            } else {
                replies.remove(0)
            }
        }
    }

    struct FixedMerger(Result<String, CollaboratorError>);

    #[async_trait]
    impl Merger for FixedMerger {
        async fn merge(
            &self,
            _subtask: &str,
            _candidates: &[String],
        ) -> Result<String, CollaboratorError> {
            self.0.clone()
        }
    }

    fn coordinator(
        worker: Arc<ScriptedWorker>,
        merger: Option<Arc<dyn Merger>>,
        merge_policy: MergePolicy,
    ) -> WorkerCoordinator {
        WorkerCoordinator::new(
            TierWorkers::uniform(worker),
            merger,
            TierPolicy::default(),
            merge_policy,
            Duration::from_secs(5),
        )
    }

    fn request(tier: Tier) -> ProduceRequest<'static> {
        ProduceRequest {
            task_id: "t1",
            subtask: "sum the even numbers",
            tier,
            iteration: 1,
            failure_history: &[],
            prior_candidate: None,
        }
    }

    #[tokio::test]
    async fn test_solo_returns_verbatim() {
        let worker = ScriptedWorker::new(vec![Ok("print(12)".into())]);
        let coord = coordinator(worker.clone(), None, MergePolicy::Delegate);
        let candidate = coord
            .produce(&request(Tier::S), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.code, "print(12)");
        assert_eq!(candidate.provenance, MergeProvenance::Solo);
        assert_eq!(candidate.worker_count, 1);
        assert_eq!(worker.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_team_uses_merger() {
        let worker = ScriptedWorker::new(vec![]);
        let merger: Arc<dyn Merger> = Arc::new(FixedMerger(Ok("merged()".into())));
        let coord = coordinator(worker.clone(), Some(merger), MergePolicy::Delegate);
        let candidate = coord
            .produce(&request(Tier::L), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.code, "merged()");
        assert_eq!(candidate.provenance, MergeProvenance::Merged);
        assert_eq!(candidate.worker_count, 3);

        let seen = worker.seen.lock().unwrap();
        let mut indices: Vec<usize> = seen.iter().map(|(c, _)| c.worker_index).collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unreachable_merger_falls_back_to_first_proposal() {
        let worker = ScriptedWorker::new(vec![
            Ok("first".into()),
            Ok("second".into()),
            Ok("third".into()),
        ]);
        let merger: Arc<dyn Merger> = Arc::new(FixedMerger(Err(
            CollaboratorError::Unreachable("connection refused".into()),
        )));
        let coord = coordinator(worker, Some(merger), MergePolicy::Delegate);
        let candidate = coord
            .produce(&request(Tier::L), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.provenance, MergeProvenance::FirstProposal);
        assert!(!candidate.code.trim().is_empty());
    }

    #[tokio::test]
    async fn test_empty_merge_output_falls_back() {
        let worker = ScriptedWorker::new(vec![Ok("a".into()), Ok("b".into())]);
        let merger: Arc<dyn Merger> = Arc::new(FixedMerger(Ok("   ".into())));
        let coord = coordinator(worker, Some(merger), MergePolicy::Delegate);
        let candidate = coord
            .produce(&request(Tier::M), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.provenance, MergeProvenance::FirstProposal);
    }

    #[tokio::test]
    async fn test_majority_policy() {
        let worker = ScriptedWorker::new(vec![
            Ok("print(12)".into()),
            Ok("print(12)\n".into()),
            Ok("print(0)".into()),
        ]);
        let coord = coordinator(worker, None, MergePolicy::Majority);
        let candidate = coord
            .produce(&request(Tier::L), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.provenance, MergeProvenance::Majority);
        assert_eq!(candidate.code.trim(), "print(12)");
    }

    #[tokio::test]
    async fn test_malformed_proposals_are_dropped() {
        let worker = ScriptedWorker::new(vec![
            Ok("".into()),
            Ok("print(1)".into()),
        ]);
        let coord = coordinator(worker, None, MergePolicy::First);
        let candidate = coord
            .produce(&request(Tier::M), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.code, "print(1)");
    }

    #[tokio::test]
    async fn test_all_malformed_is_attempt_failure() {
        let worker = ScriptedWorker::new(vec![Ok(" ".into())]);
        let coord = coordinator(worker, None, MergePolicy::Delegate);
        let err = coord
            .produce(&request(Tier::S), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_fault() {
        let worker = ScriptedWorker::new(vec![Err(CollaboratorError::Unreachable("down".into()))]);
        let coord = coordinator(worker, None, MergePolicy::Delegate);
        let err = coord
            .produce(&request(Tier::S), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Worker { tier: Tier::S, index: 0, .. }));
        assert!(!err.is_malformed());
    }

    #[tokio::test]
    async fn test_retry_context_forwarded_to_every_worker() {
        let worker = ScriptedWorker::new(vec![]);
        let coord = coordinator(worker.clone(), None, MergePolicy::First);
        let history = vec!["Test 1: expected '12', got '0'".to_string()];
        let req = ProduceRequest {
            iteration: 2,
            failure_history: &history,
            prior_candidate: Some("print(0)"),
            ..request(Tier::M)
        };
        coord.produce(&req, &CancellationToken::new()).await.unwrap();

        let seen = worker.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for (context, failures) in seen.iter() {
            assert!(context.is_retry());
            assert_eq!(context.prior_candidate.as_deref(), Some("print(0)"));
            assert_eq!(context.iteration, 2);
            assert_eq!(failures, &history);
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let worker = ScriptedWorker::new(vec![]);
        let coord = coordinator(worker, None, MergePolicy::First);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = coord.produce(&request(Tier::S), &cancel).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Cancelled));
    }
}
