//! Batch execution: every selected task under every selected mode.

use std::path::PathBuf;
use std::sync::Arc;

use coordination::{RunMode, RunReport, Task, ValidationReport, Validator, WorkflowEngine};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::report;
use crate::tasks::LoadedTask;

/// Which pipelines to run per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModeSelection {
    Baseline,
    Adaptive,
    #[default]
    Both,
}

impl ModeSelection {
    pub fn modes(self) -> Vec<RunMode> {
        match self {
            Self::Baseline => vec![RunMode::Baseline],
            Self::Adaptive => vec![RunMode::Adaptive],
            Self::Both => vec![RunMode::Baseline, RunMode::Adaptive],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub modes: Vec<RunMode>,
    /// Runs in flight at once (at least 1)
    pub concurrency: usize,
    /// Reports are persisted here when set
    pub output_dir: Option<PathBuf>,
}

/// Run `tasks` × `options.modes` with bounded concurrency.
///
/// Reports come back sorted by task id, then mode. Runs that were still
/// queued when `cancel` fired report as cancelled faults.
pub async fn run_batch(
    engine: Arc<WorkflowEngine>,
    tasks: Vec<Task>,
    options: &BatchOptions,
    cancel: &CancellationToken,
) -> Vec<RunReport> {
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let total = tasks.len() * options.modes.len();

    info!(
        tasks = tasks.len(),
        modes = options.modes.len(),
        concurrency = options.concurrency.max(1),
        "Batch started"
    );

    for task in tasks {
        let task = Arc::new(task);
        for &mode in &options.modes {
            let engine = engine.clone();
            let task = task.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                engine.run(&task, mode, &cancel).await
            });
        }
    }

    let mut reports = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(run) => {
                info!(
                    done = reports.len() + 1,
                    total,
                    "{}",
                    run.summary()
                );
                if let Some(dir) = &options.output_dir {
                    report::write_run_report(&run, dir);
                    report::append_run(&run, dir);
                }
                reports.push(run);
            }
            Err(e) => error!("Run task failed to complete: {e}"),
        }
    }

    reports.sort_by(|a, b| {
        a.task_id
            .cmp(&b.task_id)
            .then_with(|| a.mode.to_string().cmp(&b.mode.to_string()))
    });
    reports
}

/// Outcome of checking one task's reference solution.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub task_id: String,
    /// `None` when the task ships no reference solution
    pub report: Option<ValidationReport>,
}

impl VerifyOutcome {
    pub fn passed(&self) -> bool {
        self.report.as_ref().is_some_and(|r| r.passed)
    }
}

/// Validate every reference solution through `validator` alone.
pub async fn verify_references(
    validator: &Validator,
    tasks: &[LoadedTask],
    cancel: &CancellationToken,
) -> Vec<VerifyOutcome> {
    let mut outcomes = Vec::with_capacity(tasks.len());
    for loaded in tasks {
        if cancel.is_cancelled() {
            warn!("Verification cancelled");
            break;
        }
        let task_id = loaded.task.id.clone();
        let Some(code) = &loaded.reference_solution else {
            warn!(task_id = %task_id, "No reference solution");
            outcomes.push(VerifyOutcome {
                task_id,
                report: None,
            });
            continue;
        };
        let report = validator.validate(code, &loaded.task.tests, cancel).await;
        if report.passed {
            info!(task_id = %task_id, "Reference solution {}", report.summary());
        } else {
            warn!(
                task_id = %task_id,
                failures = ?report.failures,
                "Reference solution {}",
                report.summary()
            );
        }
        outcomes.push(VerifyOutcome {
            task_id,
            report: Some(report),
        });
    }
    outcomes
}
