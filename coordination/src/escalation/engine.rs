//! Workflow Engine — Plan → Route → Produce → Validate → escalate or stop
//!
//! One [`WorkflowEngine`] is shared by many concurrent runs; it only holds
//! read-only configuration and collaborator handles. Each call to
//! [`WorkflowEngine::run`] owns its own [`WorkflowState`] and
//! [`WorkflowMachine`] and always returns a [`RunReport`] with exactly one
//! terminal status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::machine::{TransitionRecord, WorkflowMachine, WorkflowPhase};
use super::policy::{DifficultyScore, PolicyError, Tier, TierPolicy};
use super::state::{AttemptRecord, EscalationRecord, RunStatus, WorkflowState};
use crate::collaborators::{call_bounded, CollaboratorError, Merger, Plan, Planner, Worker};
use crate::ensemble::{
    CoordinatorError, MergePolicy, ProduceRequest, TierWorkers, WorkerCoordinator,
};
use crate::task::{Candidate, Task};
use crate::verifier::{SandboxConfig, ValidationReport, Validator};

/// Errors raised while building an engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid tier policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("invalid engine configuration: {0}")]
    Config(String),
}

/// Which pipeline a run goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One baseline worker, one attempt, no planning or escalation
    Baseline,
    /// Planner, tier routing, teams and escalation
    Adaptive,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Category of a run-level fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Planner unreachable, timed out, or malformed with no fallback
    Planner,
    /// Worker unreachable or timed out
    Worker,
    /// The sandbox could not launch a process for any test case
    SandboxUnavailable,
    /// Run was cancelled
    Cancelled,
    /// Engine bookkeeping error
    Internal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planner => write!(f, "planner"),
            Self::Worker => write!(f, "worker"),
            Self::SandboxUnavailable => write!(f, "sandbox_unavailable"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Why a run faulted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    pub kind: FaultKind,
    /// Phase the run was in when the fault occurred
    pub phase: WorkflowPhase,
    pub message: String,
}

/// Engine configuration, shared read-only by every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Escalations allowed before a run is exhausted
    pub max_escalations: u32,
    /// Keep retrying at the highest tier while escalations remain
    pub retry_at_top_tier: bool,
    /// Time budget for each planner/worker/merger call
    pub collaborator_timeout_secs: u64,
    /// Difficulty used when the planner stays malformed after one re-ask;
    /// `None` faults the run instead
    pub fallback_difficulty: Option<DifficultyScore>,
    /// Tier label recorded on baseline candidates
    pub baseline_tier: Tier,
    pub tiers: TierPolicy,
    pub merge: MergePolicy,
    pub sandbox: SandboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_escalations: 2,
            retry_at_top_tier: false,
            collaborator_timeout_secs: 120,
            fallback_difficulty: Some(DifficultyScore::Trivial),
            baseline_tier: Tier::S,
            tiers: TierPolicy::default(),
            merge: MergePolicy::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.tiers.validate()?;
        if self.collaborator_timeout_secs == 0 {
            return Err(EngineError::Config(
                "collaborator_timeout_secs must be positive".into(),
            ));
        }
        if self.sandbox.interpreter.is_empty() {
            return Err(EngineError::Config("sandbox interpreter is empty".into()));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(EngineError::Config("sandbox timeout_secs must be positive".into()));
        }
        if self.sandbox.max_parallel_cases == 0 {
            return Err(EngineError::Config(
                "sandbox max_parallel_cases must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

/// Collaborator wiring injected at construction
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub workers: TierWorkers,
    pub merger: Option<Arc<dyn Merger>>,
    /// Single worker used by [`RunMode::Baseline`]
    pub baseline: Arc<dyn Worker>,
}

impl Collaborators {
    /// One worker for every tier and for the baseline
    pub fn uniform(
        planner: Arc<dyn Planner>,
        worker: Arc<dyn Worker>,
        merger: Option<Arc<dyn Merger>>,
    ) -> Self {
        Self {
            planner,
            workers: TierWorkers::uniform(worker.clone()),
            merger,
            baseline: worker,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("has_merger", &self.merger.is_some())
            .finish_non_exhaustive()
    }
}

/// Per-run report: the only output of [`WorkflowEngine::run`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub task_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<DifficultyScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_tier: Option<Tier>,
    /// Tier of the passing attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_tier: Option<Tier>,
    pub escalation_count: u32,
    pub attempts: Vec<AttemptRecord>,
    pub escalations: Vec<EscalationRecord>,
    pub transitions: Vec<TransitionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultRecord>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Candidate of the passing attempt
    pub fn final_candidate(&self) -> Option<&Candidate> {
        self.attempts
            .iter()
            .find(|a| a.passed())
            .and_then(|a| a.candidate.as_ref())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {} — {} attempt(s), {} escalation(s), {}ms",
            self.task_id,
            self.mode,
            self.status,
            self.attempt_count(),
            self.escalation_count,
            self.elapsed_ms
        )
    }
}

/// Bookkeeping for one run in flight
struct Run {
    run_id: Uuid,
    mode: RunMode,
    machine: WorkflowMachine,
    state: WorkflowState,
    plan: Option<Plan>,
    initial_tier: Option<Tier>,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Run {
    fn new(task: &Task, mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            machine: WorkflowMachine::new(),
            state: WorkflowState::new(task.id.clone()),
            plan: None,
            initial_tier: None,
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    fn advance(&mut self, to: WorkflowPhase, reason: Option<&str>) -> Result<(), FaultRecord> {
        self.machine.advance(to, reason).map_err(|e| FaultRecord {
            kind: FaultKind::Internal,
            phase: self.machine.current(),
            message: e.to_string(),
        })
    }

    fn fault(&self, kind: FaultKind, message: impl Into<String>) -> FaultRecord {
        FaultRecord {
            kind,
            phase: self.machine.current(),
            message: message.into(),
        }
    }

    fn finish(mut self, outcome: Result<RunStatus, FaultRecord>) -> RunReport {
        let (status, fault) = match outcome {
            Ok(status) => (status, None),
            Err(fault) => {
                if !self.machine.is_terminal() {
                    // Only fails from a terminal phase, which was just excluded.
                    let _ = self.machine.fault(&fault.message);
                }
                error!(
                    task_id = %self.state.task_id,
                    kind = %fault.kind,
                    phase = %fault.phase,
                    "Run faulted: {}",
                    fault.message
                );
                (RunStatus::Faulted, Some(fault))
            }
        };
        self.state.status = status;

        let (difficulty, rationale) = match self.plan {
            Some(plan) => (Some(plan.difficulty), Some(plan.rationale)),
            None => (None, None),
        };
        let report = RunReport {
            run_id: self.run_id,
            winning_tier: self.state.winning_tier(),
            task_id: self.state.task_id,
            mode: self.mode,
            status,
            difficulty,
            rationale,
            initial_tier: self.initial_tier,
            escalation_count: self.state.escalation_count,
            attempts: self.state.attempts,
            escalations: self.state.escalations,
            transitions: self.machine.into_transitions(),
            fault,
            started_at: self.started_at,
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        };
        info!(
            task_id = %report.task_id,
            mode = %report.mode,
            status = %report.status,
            attempts = report.attempt_count(),
            escalations = report.escalation_count,
            elapsed_ms = report.elapsed_ms,
            "Run finished"
        );
        report
    }
}

/// What happens after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    Escalate(Tier),
    Exhausted,
}

/// The workflow engine
pub struct WorkflowEngine {
    config: EngineConfig,
    planner: Arc<dyn Planner>,
    baseline: Arc<dyn Worker>,
    coordinator: WorkerCoordinator,
    validator: Validator,
}

impl WorkflowEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let coordinator = WorkerCoordinator::new(
            collaborators.workers,
            collaborators.merger,
            config.tiers,
            config.merge,
            config.collaborator_timeout(),
        );
        let validator = Validator::new(config.sandbox.clone());
        Ok(Self {
            planner: collaborators.planner,
            baseline: collaborators.baseline,
            coordinator,
            validator,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Process one task end to end.
    pub async fn run(&self, task: &Task, mode: RunMode, cancel: &CancellationToken) -> RunReport {
        info!(task_id = %task.id, %mode, tests = task.tests.len(), "Run started");
        let mut run = Run::new(task, mode);
        let outcome = match mode {
            RunMode::Adaptive => self.run_adaptive(&mut run, task, cancel).await,
            RunMode::Baseline => self.run_baseline(&mut run, task, cancel).await,
        };
        run.finish(outcome)
    }

    async fn run_baseline(
        &self,
        run: &mut Run,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, FaultRecord> {
        self.check_cancelled(run, cancel)?;
        let tier = self.config.baseline_tier;
        run.machine.set_iteration(1);
        run.advance(WorkflowPhase::Producing, Some("baseline"))?;

        let request = ProduceRequest {
            task_id: &task.id,
            subtask: &task.description,
            tier,
            iteration: 1,
            failure_history: &[],
            prior_candidate: None,
        };
        let produced = self
            .coordinator
            .produce_with(&self.baseline, 1, &request, cancel)
            .await;

        match produced {
            Ok(candidate) => run.state.push_pending(candidate),
            Err(e) if e.is_malformed() => {
                run.state.record_malformed(tier, &e.to_string());
                run.advance(WorkflowPhase::Exhausted, Some("malformed output"))?;
                return Ok(RunStatus::Exhausted);
            }
            Err(e) => return Err(self.coordinator_fault(run, e)),
        }

        run.advance(WorkflowPhase::Validating, None)?;
        let report = self.validate_latest(run, task, cancel).await?;
        if report.passed {
            run.advance(WorkflowPhase::Passed, None)?;
            Ok(RunStatus::Passed)
        } else {
            run.advance(WorkflowPhase::Exhausted, Some("single attempt"))?;
            Ok(RunStatus::Exhausted)
        }
    }

    async fn run_adaptive(
        &self,
        run: &mut Run,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, FaultRecord> {
        self.check_cancelled(run, cancel)?;
        run.advance(WorkflowPhase::Planning, None)?;
        let plan = self.plan(run, task, cancel).await?;
        let mut tier = self.config.tiers.initial_tier(plan.difficulty);
        info!(
            task_id = %task.id,
            difficulty = %plan.difficulty,
            %tier,
            team = %self.config.tiers.team_mode(tier),
            "Task planned"
        );
        let reason = format!("difficulty {} → tier {}", plan.difficulty, tier);
        run.plan = Some(plan);
        run.initial_tier = Some(tier);
        run.advance(WorkflowPhase::Routing, Some(&reason))?;

        loop {
            self.check_cancelled(run, cancel)?;
            let iteration = run.state.next_iteration();
            run.machine.set_iteration(iteration);
            run.advance(WorkflowPhase::Producing, None)?;

            let produced = {
                let request = ProduceRequest {
                    task_id: &task.id,
                    subtask: &task.description,
                    tier,
                    iteration,
                    failure_history: &run.state.failure_history,
                    prior_candidate: run.state.latest_candidate().map(|c| c.code.as_str()),
                };
                self.coordinator.produce(&request, cancel).await
            };

            let failure_reason = match produced {
                Ok(candidate) => {
                    run.state.push_pending(candidate);
                    run.advance(WorkflowPhase::Validating, None)?;
                    let report = self.validate_latest(run, task, cancel).await?;
                    if report.passed {
                        run.advance(WorkflowPhase::Passed, None)?;
                        return Ok(RunStatus::Passed);
                    }
                    format!("{} failing test case(s)", report.failures.len())
                }
                Err(e) if e.is_malformed() => {
                    warn!(task_id = %task.id, %tier, iteration, "No usable candidate: {e}");
                    run.state.record_malformed(tier, &e.to_string());
                    "malformed output".to_string()
                }
                Err(e) => return Err(self.coordinator_fault(run, e)),
            };

            match self.next_step(&run.state, tier) {
                NextStep::Exhausted => {
                    info!(
                        task_id = %task.id,
                        escalations = run.state.escalation_count,
                        "Escalation bound reached"
                    );
                    run.advance(WorkflowPhase::Exhausted, Some(&failure_reason))?;
                    return Ok(RunStatus::Exhausted);
                }
                NextStep::Escalate(next) => {
                    info!(task_id = %task.id, from = %tier, to = %next, "Escalating");
                    run.advance(WorkflowPhase::Escalating, Some(&failure_reason))?;
                    run.state.escalate(next, failure_reason);
                    tier = next;
                    run.advance(WorkflowPhase::Routing, Some(&format!("escalated to {next}")))?;
                }
            }
        }
    }

    /// Exhausted once the bound is reached or the tier is maximal
    /// (unless retries at the top tier are enabled).
    fn next_step(&self, state: &WorkflowState, tier: Tier) -> NextStep {
        if state.escalation_count >= self.config.max_escalations {
            return NextStep::Exhausted;
        }
        match self.config.tiers.next_tier(tier) {
            Some(next) => NextStep::Escalate(next),
            None if self.config.retry_at_top_tier => NextStep::Escalate(tier),
            None => NextStep::Exhausted,
        }
    }

    /// Ask the planner, re-asking once on malformed output.
    async fn plan(
        &self,
        run: &Run,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Plan, FaultRecord> {
        let timeout = self.config.collaborator_timeout();
        let mut last_error = None;

        for ask in 1..=2 {
            let res = call_bounded(
                self.planner.plan(&task.description, &task.id),
                timeout,
                cancel,
            )
            .await;
            match res {
                Ok(plan) => return Ok(plan),
                Err(e) if e.is_malformed() => {
                    warn!(task_id = %task.id, ask, "Malformed plan: {e}");
                    last_error = Some(e);
                }
                Err(CollaboratorError::Cancelled) => {
                    return Err(run.fault(FaultKind::Cancelled, "cancelled during planning"))
                }
                Err(e) => return Err(run.fault(FaultKind::Planner, e.to_string())),
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        match self.config.fallback_difficulty {
            Some(difficulty) => {
                warn!(task_id = %task.id, %difficulty, "Using fallback difficulty");
                Ok(Plan {
                    difficulty,
                    rationale: format!("fallback difficulty after malformed plan: {reason}"),
                })
            }
            None => Err(run.fault(FaultKind::Planner, reason)),
        }
    }

    /// Validate the pending attempt and finalise it.
    async fn validate_latest(
        &self,
        run: &mut Run,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, FaultRecord> {
        let Some(code) = run.state.pending_candidate().map(|c| c.code.clone()) else {
            return Err(run.fault(FaultKind::Internal, "no pending candidate to validate"));
        };
        let report = self.validator.validate(&code, &task.tests, cancel).await;
        if !run.state.finalize_attempt(&report) {
            return Err(run.fault(FaultKind::Internal, "attempt finalised twice"));
        }
        debug!(task_id = %task.id, summary = %report.summary(), "Attempt validated");

        if report.was_cancelled() || cancel.is_cancelled() {
            return Err(run.fault(FaultKind::Cancelled, "cancelled during validation"));
        }
        if report.all_launch_failed() {
            let detail = report
                .cases
                .first()
                .and_then(|c| c.error.clone())
                .unwrap_or_default();
            return Err(run.fault(
                FaultKind::SandboxUnavailable,
                format!("sandbox could not launch any test case: {detail}"),
            ));
        }
        Ok(report)
    }

    fn check_cancelled(&self, run: &Run, cancel: &CancellationToken) -> Result<(), FaultRecord> {
        if cancel.is_cancelled() {
            Err(run.fault(FaultKind::Cancelled, "run cancelled"))
        } else {
            Ok(())
        }
    }

    fn coordinator_fault(&self, run: &Run, err: CoordinatorError) -> FaultRecord {
        match err {
            CoordinatorError::Cancelled => run.fault(FaultKind::Cancelled, "cancelled while producing"),
            other => run.fault(FaultKind::Worker, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::WorkContext;
    use crate::task::MergeProvenance;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedPlanner(Vec<Result<Plan, CollaboratorError>>, Mutex<usize>);

    impl FixedPlanner {
        fn new(replies: Vec<Result<Plan, CollaboratorError>>) -> Arc<Self> {
            Arc::new(Self(replies, Mutex::new(0)))
        }

        fn calls(&self) -> usize {
            *self.1.lock().unwrap()
        }
    }

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(&self, _description: &str, _task_id: &str) -> Result<Plan, CollaboratorError> {
            let mut calls = self.1.lock().unwrap();
            let reply = self.0[(*calls).min(self.0.len() - 1)].clone();
            *calls += 1;
            reply
        }
    }

    struct EchoWorker(&'static str);

    #[async_trait]
    impl Worker for EchoWorker {
        async fn propose(
            &self,
            _subtask: &str,
            _context: &WorkContext,
            _failure_history: &[String],
        ) -> Result<String, CollaboratorError> {
            Ok(self.0.to_string())
        }
    }

    fn plan(difficulty: DifficultyScore) -> Result<Plan, CollaboratorError> {
        Ok(Plan {
            difficulty,
            rationale: "test".into(),
        })
    }

    fn engine(
        planner: Arc<FixedPlanner>,
        code: &'static str,
        config: EngineConfig,
    ) -> WorkflowEngine {
        WorkflowEngine::new(
            Collaborators::uniform(planner, Arc::new(EchoWorker(code)), None),
            config,
        )
        .unwrap()
    }

    fn shell_config() -> EngineConfig {
        EngineConfig {
            sandbox: SandboxConfig {
                timeout_secs: 2,
                ..SandboxConfig::shell()
            },
            ..Default::default()
        }
    }

    fn task() -> Task {
        Task::new("t1", "print 12").with_test("", "12")
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        let bad = EngineConfig {
            collaborator_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_next_step_rules() {
        let e = engine(FixedPlanner::new(vec![plan(DifficultyScore::Trivial)]), "", shell_config());
        let mut state = WorkflowState::new("t");
        assert_eq!(e.next_step(&state, Tier::S), NextStep::Escalate(Tier::M));
        assert_eq!(e.next_step(&state, Tier::L), NextStep::Exhausted);
        state.escalation_count = 2;
        assert_eq!(e.next_step(&state, Tier::S), NextStep::Exhausted);

        let e = engine(
            FixedPlanner::new(vec![plan(DifficultyScore::Trivial)]),
            "",
            EngineConfig {
                retry_at_top_tier: true,
                ..shell_config()
            },
        );
        state.escalation_count = 1;
        assert_eq!(e.next_step(&state, Tier::L), NextStep::Escalate(Tier::L));
    }

    #[tokio::test]
    async fn test_passes_at_initial_tier() {
        let planner = FixedPlanner::new(vec![plan(DifficultyScore::Medium)]);
        let e = engine(planner, "echo 12", shell_config());
        let report = e.run(&task(), RunMode::Adaptive, &CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Passed);
        assert_eq!(report.initial_tier, Some(Tier::M));
        assert_eq!(report.winning_tier, Some(Tier::M));
        assert_eq!(report.escalation_count, 0);
        assert!(report.final_candidate().is_some());
    }

    #[tokio::test]
    async fn test_malformed_plan_reasked_then_fallback() {
        let planner = FixedPlanner::new(vec![Err(CollaboratorError::MalformedPlan("bad".into()))]);
        let e = engine(planner.clone(), "echo 12", shell_config());
        let report = e.run(&task(), RunMode::Adaptive, &CancellationToken::new()).await;
        assert_eq!(planner.calls(), 2);
        assert_eq!(report.status, RunStatus::Passed);
        assert_eq!(report.difficulty, Some(DifficultyScore::Trivial));
        assert!(report.rationale.unwrap().contains("fallback"));
    }

    #[tokio::test]
    async fn test_malformed_plan_without_fallback_faults() {
        let planner = FixedPlanner::new(vec![Err(CollaboratorError::MalformedPlan("bad".into()))]);
        let e = engine(
            planner,
            "echo 12",
            EngineConfig {
                fallback_difficulty: None,
                ..shell_config()
            },
        );
        let report = e.run(&task(), RunMode::Adaptive, &CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Faulted);
        assert_eq!(report.fault.unwrap().kind, FaultKind::Planner);
        assert!(report.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_planner_faults_without_escalation() {
        let planner = FixedPlanner::new(vec![Err(CollaboratorError::Unreachable("down".into()))]);
        let e = engine(planner.clone(), "echo 12", shell_config());
        let report = e.run(&task(), RunMode::Adaptive, &CancellationToken::new()).await;
        assert_eq!(planner.calls(), 1);
        assert_eq!(report.status, RunStatus::Faulted);
        let fault = report.fault.unwrap();
        assert_eq!(fault.kind, FaultKind::Planner);
        assert_eq!(fault.phase, WorkflowPhase::Planning);
        assert_eq!(report.escalation_count, 0);
        assert_eq!(
            report.transitions.last().map(|t| t.to),
            Some(WorkflowPhase::Faulted)
        );
    }

    #[tokio::test]
    async fn test_baseline_single_attempt() {
        let planner = FixedPlanner::new(vec![plan(DifficultyScore::Hard)]);
        let e = engine(planner.clone(), "echo 0", shell_config());
        let report = e.run(&task(), RunMode::Baseline, &CancellationToken::new()).await;
        assert_eq!(planner.calls(), 0);
        assert_eq!(report.status, RunStatus::Exhausted);
        assert_eq!(report.attempt_count(), 1);
        assert_eq!(report.escalation_count, 0);
        assert!(report.difficulty.is_none());
        assert_eq!(report.attempts[0].failures, vec!["Test 1: expected '12', got '0'"]);
    }

    #[tokio::test]
    async fn test_missing_interpreter_faults_run() {
        let planner = FixedPlanner::new(vec![plan(DifficultyScore::Trivial)]);
        let mut config = shell_config();
        config.sandbox.interpreter = vec!["no-such-interpreter-stepladder".into()];
        let e = engine(planner, "echo 12", config);
        let report = e.run(&task(), RunMode::Adaptive, &CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Faulted);
        assert_eq!(report.fault.unwrap().kind, FaultKind::SandboxUnavailable);
        assert_eq!(report.escalation_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let planner = FixedPlanner::new(vec![plan(DifficultyScore::Trivial)]);
        let e = engine(planner.clone(), "echo 12", shell_config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = e.run(&task(), RunMode::Adaptive, &cancel).await;
        assert_eq!(report.status, RunStatus::Faulted);
        assert_eq!(report.fault.unwrap().kind, FaultKind::Cancelled);
        assert_eq!(planner.calls(), 0);
    }

    #[tokio::test]
    async fn test_validating_finalised_attempt_is_internal_fault() {
        let e = engine(FixedPlanner::new(vec![plan(DifficultyScore::Trivial)]), "", shell_config());
        let task = task();
        let mut run = Run::new(&task, RunMode::Adaptive);
        let cancel = CancellationToken::new();

        let fault = e.validate_latest(&mut run, &task, &cancel).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Internal);

        run.state.push_pending(Candidate::new(
            "echo 12",
            Tier::S,
            1,
            1,
            MergeProvenance::Solo,
        ));
        let report = e.validate_latest(&mut run, &task, &cancel).await.unwrap();
        assert!(report.passed);

        let fault = e.validate_latest(&mut run, &task, &cancel).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Internal);
        assert_eq!(run.state.attempts.len(), 1);
    }

    #[test]
    fn test_report_serializes_status_snake_case() {
        let json = serde_json::to_value(RunStatus::Exhausted).unwrap();
        assert_eq!(json, "exhausted");
        let json = serde_json::to_value(FaultKind::SandboxUnavailable).unwrap();
        assert_eq!(json, "sandbox_unavailable");
    }
}
