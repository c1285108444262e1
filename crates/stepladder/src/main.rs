use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coordination::{Validator, WorkflowEngine};
use stepladder::report::{self, ComparisonSummary};
use stepladder::{
    build_collaborators, run_batch, verify_references, BatchOptions, ChatClient, ModeSelection,
    Preset, StepladderConfig, TaskSource,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (STEPLADDER_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging unless RUST_LOG is set
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the baseline and/or adaptive pipeline over a task directory
    Run(RunArgs),
    /// Check each task's reference solution against its tests
    Verify(VerifyArgs),
    /// List loadable tasks
    List(ListArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    tasks_dir: PathBuf,

    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = ModeSelection::Both)]
    mode: ModeSelection,

    /// Model line-up for the adaptive pipeline
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// Run a single task by id
    #[arg(long)]
    task: Option<String>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    max_escalations: Option<u32>,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    #[arg(long)]
    tasks_dir: PathBuf,

    #[arg(long)]
    task: Option<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long)]
    tasks_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let mut config = StepladderConfig::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight runs");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Run(args) => run(&mut config, args, &cancel).await,
        Command::Verify(args) => verify(&config, args, &cancel).await,
        Command::List(args) => list(args),
    }
}

async fn run(
    config: &mut StepladderConfig,
    args: RunArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(preset) = args.preset {
        config.run.preset = preset;
    }
    if let Some(concurrency) = args.concurrency {
        config.run.concurrency = concurrency;
    }
    if let Some(max) = args.max_escalations {
        config.engine.max_escalations = max;
    }

    let tasks = TaskSource::new(&args.tasks_dir)
        .select(args.task.as_deref())
        .with_context(|| format!("Failed to load tasks from {}", args.tasks_dir.display()))?;
    if tasks.is_empty() {
        anyhow::bail!("No tasks found in {}", args.tasks_dir.display());
    }

    let models = config.models();
    info!(
        preset = %config.run.preset,
        planner = %models.planner,
        worker_s = %models.worker_s,
        worker_m = %models.worker_m,
        worker_l = %models.worker_l,
        baseline = %models.baseline,
        endpoint = %config.endpoint.base_url,
        "Collaborators configured"
    );

    let client = ChatClient::new(&config.endpoint).context("Failed to build HTTP client")?;
    let collaborators = build_collaborators(Arc::new(client), &models);
    let engine = WorkflowEngine::new(collaborators, config.engine_config())
        .context("Invalid engine configuration")?;

    let options = BatchOptions {
        modes: args.mode.modes(),
        concurrency: config.run.concurrency,
        output_dir: Some(args.output_dir.clone()),
    };
    let reports = run_batch(
        Arc::new(engine),
        tasks.into_iter().map(|t| t.task).collect(),
        &options,
        cancel,
    )
    .await;

    let summary = ComparisonSummary::from_reports(&reports);
    summary.log();
    report::write_summary(&summary, &args.output_dir);
    Ok(())
}

async fn verify(
    config: &StepladderConfig,
    args: VerifyArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let tasks = TaskSource::new(&args.tasks_dir)
        .select(args.task.as_deref())
        .with_context(|| format!("Failed to load tasks from {}", args.tasks_dir.display()))?;

    let validator = Validator::new(config.sandbox.clone());
    let outcomes = verify_references(&validator, &tasks, cancel).await;

    let checked = outcomes.iter().filter(|o| o.report.is_some()).count();
    let passed = outcomes.iter().filter(|o| o.passed()).count();
    info!(tasks = outcomes.len(), checked, passed, "Verification finished");

    if passed < checked {
        anyhow::bail!("{} of {} reference solutions failed", checked - passed, checked);
    }
    Ok(())
}

fn list(args: ListArgs) -> Result<()> {
    let tasks = TaskSource::new(&args.tasks_dir)
        .load_all()
        .with_context(|| format!("Failed to read {}", args.tasks_dir.display()))?;
    for loaded in &tasks {
        println!(
            "{}\t{} tests{}",
            loaded.task.id,
            loaded.task.tests.len(),
            if loaded.reference_solution.is_some() {
                "\treference"
            } else {
                ""
            }
        );
    }
    info!(count = tasks.len(), "Listed tasks");
    Ok(())
}
