//! Bounded-concurrency solver execution and the run ledger.
//!
//! Every rendered task becomes one solver process. Failures are isolated
//! per task: a crash, timeout, or missing output marks that task failed
//! and the rest of the campaign keeps going. The ledger records one entry
//! per dispatched task so a run can be audited after the fact.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use mms_kernel::runner::{run_all, JobOutcome, JobReport, RunnerConfig};
use mms_kernel::{CancelFlag, SolverEngine, SolverError, SolverJob};

use crate::render::{RenderedTask, SCRIPT_FILE};

/// How many trailing characters of solver stderr a diagnostic keeps.
const STDERR_TAIL: usize = 200;

#[derive(Debug, Error)]
pub enum ExecutionFailure {
    #[error("could not prepare task directory: {0}")]
    Setup(#[from] std::io::Error),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("solver exited with code {code}: {stderr_tail}")]
    NonZeroExit { code: i32, stderr_tail: String },

    #[error("solver killed by signal")]
    Killed,

    #[error("solver exited cleanly but produced no results file")]
    MissingResults,
}

/// Campaign-level execution knobs.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    pub max_workers: usize,
    /// Wall-clock budget per solver process.
    pub task_timeout: Duration,
    /// Optional budget for the whole run; tasks not yet dispatched when it
    /// expires are skipped.
    pub run_deadline: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            task_timeout: Duration::from_secs(600),
            run_deadline: None,
        }
    }
}

/// Run every task through the solver with bounded concurrency.
///
/// Reports come back in task order, one per input task, regardless of
/// completion order.
pub async fn execute_all<E: SolverEngine>(
    engine: &E,
    tasks: Vec<RenderedTask>,
    config: &ExecutionConfig,
    cancel: &CancelFlag,
) -> Vec<JobReport<PathBuf, ExecutionFailure>> {
    let runner_config = RunnerConfig {
        max_workers: config.max_workers,
        deadline: config.run_deadline,
    };
    let timeout = config.task_timeout;
    info!(
        tasks = tasks.len(),
        workers = runner_config.max_workers,
        "dispatching solver processes"
    );
    run_all(
        tasks,
        &runner_config,
        cancel,
        |task| task.id.clone(),
        |task| async move { execute_one(engine, &task, timeout).await },
    )
    .await
}

/// Run one task: clear stale results, invoke the solver in the task
/// directory, and verify it left a results file behind.
async fn execute_one<E: SolverEngine>(
    engine: &E,
    task: &RenderedTask,
    timeout: Duration,
) -> Result<PathBuf, ExecutionFailure> {
    if task.results_path.exists() {
        std::fs::remove_file(&task.results_path)?;
    }

    let run = engine
        .submit(SolverJob {
            script: Path::new(SCRIPT_FILE),
            args: &task.solver_args,
            workdir: &task.dir,
            timeout,
        })
        .await?;

    match run.exit_code {
        Some(0) => {
            if task.results_path.exists() {
                Ok(task.results_path.clone())
            } else {
                Err(ExecutionFailure::MissingResults)
            }
        }
        Some(code) => Err(ExecutionFailure::NonZeroExit {
            code,
            stderr_tail: tail(&run.stderr, STDERR_TAIL),
        }),
        None => Err(ExecutionFailure::Killed),
    }
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(max.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One ledger entry per dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_file: Option<PathBuf>,
}

/// Audit record of one campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedger {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub solver_command: String,
    pub max_workers: usize,
    pub tasks: Vec<TaskRecord>,
}

impl RunLedger {
    pub fn new(solver_command: &str, max_workers: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            solver_command: solver_command.to_string(),
            max_workers,
            tasks: Vec::new(),
        }
    }

    /// Absorb the execution reports and stamp the finish time.
    pub fn finish(&mut self, reports: &[JobReport<PathBuf, ExecutionFailure>]) {
        self.finished_at = Utc::now();
        self.tasks = reports
            .iter()
            .map(|report| {
                let (status, diagnostic, results_file) = match &report.outcome {
                    JobOutcome::Done(path) => (TaskStatus::Succeeded, None, Some(path.clone())),
                    JobOutcome::Failed(err) => (TaskStatus::Failed, Some(err.to_string()), None),
                    JobOutcome::Skipped(reason) => {
                        (TaskStatus::Skipped, Some(reason.to_string()), None)
                    }
                };
                TaskRecord {
                    id: report.id.clone(),
                    status,
                    elapsed_secs: report.elapsed.as_secs_f64(),
                    diagnostic,
                    results_file,
                }
            })
            .collect();
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
