//! Run persistence and the per-mode comparison summary.
//!
//! Three sinks under the output directory:
//! - `<mode>/<task_id>.json`: one pretty report per run, overwritten on rerun
//! - `runs.jsonl`: append-only log of every run
//! - `summary.json`: [`ComparisonSummary`] for the whole invocation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use coordination::{RunMode, RunReport, RunStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Path of the per-run report for `report`.
pub fn run_report_path(report: &RunReport, out_dir: &Path) -> PathBuf {
    let file_name: String = report
        .task_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    out_dir
        .join(report.mode.to_string())
        .join(format!("{file_name}.json"))
}

/// Write `report` as pretty JSON to `<out_dir>/<mode>/<task_id>.json`.
pub fn write_run_report(report: &RunReport, out_dir: &Path) {
    let path = run_report_path(report, out_dir);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create report directory: {e}");
            return;
        }
    }
    match serde_json::to_string_pretty(report) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote run report"),
            Err(e) => warn!("Failed to write run report: {e}"),
        },
        Err(e) => warn!("Failed to serialize run report: {e}"),
    }
}

/// Append `report` as one line to `<out_dir>/runs.jsonl`.
pub fn append_run(report: &RunReport, out_dir: &Path) {
    let path = out_dir.join("runs.jsonl");
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            if let Err(e) = std::fs::create_dir_all(out_dir) {
                warn!("Failed to create output directory: {e}");
                return;
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append run: {e}");
                    }
                }
                Err(e) => warn!("Failed to open run log: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize run: {e}"),
    }
}

/// Aggregates for one run mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSummary {
    pub mode: RunMode,
    pub runs: usize,
    pub passed: usize,
    pub exhausted: usize,
    pub faulted: usize,
    pub pass_rate: f64,
    pub mean_escalations: f64,
    pub mean_attempts: f64,
    pub mean_elapsed_ms: f64,
}

impl ModeSummary {
    fn from_reports(mode: RunMode, reports: &[&RunReport]) -> Self {
        let runs = reports.len();
        let count = |status: RunStatus| reports.iter().filter(|r| r.status == status).count();
        let mean = |total: f64| if runs == 0 { 0.0 } else { total / runs as f64 };
        let passed = count(RunStatus::Passed);

        Self {
            mode,
            runs,
            passed,
            exhausted: count(RunStatus::Exhausted),
            faulted: count(RunStatus::Faulted),
            pass_rate: mean(passed as f64),
            mean_escalations: mean(reports.iter().map(|r| r.escalation_count as f64).sum()),
            mean_attempts: mean(reports.iter().map(|r| r.attempt_count() as f64).sum()),
            mean_elapsed_ms: mean(reports.iter().map(|r| r.elapsed_ms as f64).sum()),
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}: {}/{} passed ({:.1}%), {} exhausted, {} faulted, {:.2} escalations/run",
            self.mode,
            self.passed,
            self.runs,
            self.pass_rate * 100.0,
            self.exhausted,
            self.faulted,
            self.mean_escalations
        )
    }
}

/// Side-by-side outcome of every mode in one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub generated_at: DateTime<Utc>,
    pub modes: Vec<ModeSummary>,
    /// Task ids where the adaptive pipeline passed and the baseline did not
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adaptive_only_passes: Vec<String>,
}

impl ComparisonSummary {
    pub fn from_reports(reports: &[RunReport]) -> Self {
        let mut by_mode: BTreeMap<String, (RunMode, Vec<&RunReport>)> = BTreeMap::new();
        for report in reports {
            by_mode
                .entry(report.mode.to_string())
                .or_insert_with(|| (report.mode, Vec::new()))
                .1
                .push(report);
        }
        let modes = by_mode
            .into_values()
            .map(|(mode, runs)| ModeSummary::from_reports(mode, &runs))
            .collect();

        let passed_in = |mode: RunMode, task_id: &str| {
            reports
                .iter()
                .any(|r| r.mode == mode && r.task_id == task_id && r.passed())
        };
        let mut adaptive_only_passes: Vec<String> = reports
            .iter()
            .filter(|r| r.mode == RunMode::Adaptive && r.passed())
            .filter(|r| {
                reports
                    .iter()
                    .any(|b| b.mode == RunMode::Baseline && b.task_id == r.task_id)
                    && !passed_in(RunMode::Baseline, &r.task_id)
            })
            .map(|r| r.task_id.clone())
            .collect();
        adaptive_only_passes.sort();
        adaptive_only_passes.dedup();

        Self {
            generated_at: Utc::now(),
            modes,
            adaptive_only_passes,
        }
    }

    pub fn mode(&self, mode: RunMode) -> Option<&ModeSummary> {
        self.modes.iter().find(|m| m.mode == mode)
    }

    pub fn log(&self) {
        for mode in &self.modes {
            info!(
                mode = %mode.mode,
                runs = mode.runs,
                passed = mode.passed,
                pass_rate = mode.pass_rate,
                "{}",
                mode.summary_line()
            );
        }
    }
}

/// Write `summary` to `<out_dir>/summary.json`.
pub fn write_summary(summary: &ComparisonSummary, out_dir: &Path) {
    let path = out_dir.join("summary.json");
    if let Err(e) = std::fs::create_dir_all(out_dir) {
        warn!("Failed to create output directory: {e}");
        return;
    }
    match serde_json::to_string_pretty(summary) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote comparison summary"),
            Err(e) => warn!("Failed to write summary: {e}"),
        },
        Err(e) => warn!("Failed to serialize summary: {e}"),
    }
}
