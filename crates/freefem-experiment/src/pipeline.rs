//! Campaign orchestration.
//!
//! Ties the stages together in their fixed order: expand the matrix,
//! derive and render every task up front, fan the solver processes out
//! with bounded concurrency, then reduce results into reports and
//! optionally convert plots. Derivation and render failures are isolated
//! per task just like solver failures; only configuration problems abort
//! a campaign.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use tracing::info;

use mms_kernel::runner::JobOutcome;
use mms_kernel::{CancelFlag, FreeFemEngine};

use crate::convert::{self, ConvertConfig};
use crate::derive::FieldDeriver;
use crate::execute::{self, ExecutionConfig, RunLedger};
use crate::library::FunctionLibrary;
use crate::matrix::{self, TaskDescriptor};
use crate::render::{RenderConfig, RenderedTask, TaskRenderer};
use crate::report::{ConvergenceReport, QUANTITIES, REPORT_FILE};
use crate::spaces::PairingTable;

/// Everything a campaign needs, resolved from the CLI surface.
#[derive(Debug)]
pub struct CampaignOptions {
    pub output_root: PathBuf,
    pub filters: Vec<String>,
    pub library: FunctionLibrary,
    pub pairings: PairingTable,
    pub render: RenderConfig,
    pub execution: ExecutionConfig,
    pub convert: ConvertConfig,
    pub solver_command: String,
    /// Treat plot-conversion failures as campaign failures.
    pub strict: bool,
}

/// One task that could not be carried through a stage.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of the generation stage.
#[derive(Debug)]
pub struct Generation {
    pub rendered: Vec<RenderedTask>,
    pub failures: Vec<TaskFailure>,
    pub total: usize,
}

/// Outcome of a full solve: generation, execution ledger, reports.
#[derive(Debug)]
pub struct SolveOutcome {
    pub generation: Generation,
    pub ledger: RunLedger,
    pub ledger_path: PathBuf,
    pub reports: Vec<ConvergenceReport>,
    pub report_failures: Vec<TaskFailure>,
}

impl SolveOutcome {
    /// True when every expanded task made it all the way to a report.
    pub fn is_clean(&self) -> bool {
        self.generation.failures.is_empty()
            && self.ledger.failed() == 0
            && self.ledger.skipped() == 0
            && self.report_failures.is_empty()
    }
}

/// Solve outcome plus the plot-conversion tally.
#[derive(Debug)]
pub struct RunOutcome {
    pub solve: SolveOutcome,
    pub converted: usize,
    pub convert_failures: Vec<TaskFailure>,
}

pub struct Campaign {
    options: CampaignOptions,
    deriver: FieldDeriver,
    renderer: TaskRenderer,
}

impl Campaign {
    pub fn new(options: CampaignOptions) -> Result<Self> {
        let renderer = TaskRenderer::new(options.render)?;
        Ok(Self {
            options,
            deriver: FieldDeriver::new(),
            renderer,
        })
    }

    pub fn options(&self) -> &CampaignOptions {
        &self.options
    }

    /// The expanded, filtered matrix in campaign order.
    pub fn expand(&self) -> Result<Vec<TaskDescriptor>> {
        Ok(matrix::expand(
            &self.options.library,
            &self.options.pairings,
            &self.options.filters,
        )?)
    }

    /// Derive and render every task. Failures are collected per task; the
    /// stage only errors out on configuration problems.
    pub fn generate(&self) -> Result<Generation> {
        print_banner("Generate solver scripts");
        let tasks = self.expand()?;
        let total = tasks.len();
        if total == 0 {
            println!("No tasks matched");
            return Ok(Generation {
                rendered: Vec::new(),
                failures: Vec::new(),
                total,
            });
        }
        info!(tasks = total, root = %self.options.output_root.display(), "generating scripts");

        let mut rendered = Vec::new();
        let mut failures = Vec::new();
        for (i, task) in tasks.iter().enumerate() {
            match self.generate_one(task) {
                Ok(out) => {
                    println!("[{}/{}] [OK] {}", i + 1, total, out.id);
                    rendered.push(out);
                }
                Err(err) => {
                    println!("[{}/{}] [FAIL] {}: {err:#}", i + 1, total, task.id());
                    failures.push(TaskFailure {
                        id: task.id(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        Ok(Generation {
            rendered,
            failures,
            total,
        })
    }

    fn generate_one(&self, task: &TaskDescriptor) -> Result<RenderedTask> {
        let fields = self.deriver.derive(&task.case)?;
        let rendered = self
            .renderer
            .render(task, &fields, &self.options.output_root)?;
        Ok(rendered)
    }

    /// Generate, execute with bounded concurrency, and reduce.
    pub async fn solve(&self, cancel: &CancelFlag) -> Result<SolveOutcome> {
        let generation = self.generate()?;

        print_banner("Run solvers");
        println!(
            "Found {} solvers, using {} parallel workers",
            generation.rendered.len(),
            self.options.execution.max_workers
        );
        let engine = FreeFemEngine::new(self.options.solver_command.as_str());
        let mut ledger = RunLedger::new(engine.command(), self.options.execution.max_workers);
        let job_reports = execute::execute_all(
            &engine,
            generation.rendered.clone(),
            &self.options.execution,
            cancel,
        )
        .await;
        ledger.finish(&job_reports);

        std::fs::create_dir_all(&self.options.output_root)?;
        let ledger_path = self.options.output_root.join(format!(
            "ledger-{}.json",
            Local::now().format("%Y%m%d-%H%M%S")
        ));
        ledger.save(&ledger_path)?;
        info!(path = %ledger_path.display(), "run ledger saved");

        print_banner("Reduce convergence rates");
        let mut reports = Vec::new();
        let mut report_failures = Vec::new();
        for (task, job) in generation.rendered.iter().zip(&job_reports) {
            let JobOutcome::Done(results_path) = &job.outcome else {
                continue;
            };
            let reduced = ConvergenceReport::from_file(&job.id, results_path)
                .map_err(anyhow::Error::from)
                .and_then(|report| {
                    report.save(&task.dir.join(REPORT_FILE))?;
                    Ok(report)
                });
            match reduced {
                Ok(report) => reports.push(report),
                Err(err) => {
                    println!("[FAIL] {}: {err:#}", job.id);
                    report_failures.push(TaskFailure {
                        id: job.id.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        print_rate_summary(&reports);

        let outcome = SolveOutcome {
            generation,
            ledger,
            ledger_path,
            reports,
            report_failures,
        };
        print_solve_summary(&outcome);
        Ok(outcome)
    }

    /// Full campaign: solve, then convert the plots.
    pub async fn run(&self, cancel: &CancelFlag) -> Result<RunOutcome> {
        let solve = self.solve(cancel).await?;

        print_banner("Convert plots");
        let eps_files = convert::find_eps_files(&self.options.output_root);
        if eps_files.is_empty() {
            println!("No EPS files found, skipping");
            return Ok(RunOutcome {
                solve,
                converted: 0,
                convert_failures: Vec::new(),
            });
        }
        println!(
            "Found {} EPS files, converting to {} at {} DPI",
            eps_files.len(),
            self.options.convert.format.extension(),
            self.options.convert.dpi
        );

        let convert_reports =
            convert::convert_all(&self.options.output_root, &self.options.convert, cancel).await;
        let converted = convert_reports
            .iter()
            .filter(|r| r.outcome.is_done())
            .count();
        let convert_failures: Vec<TaskFailure> = convert_reports
            .iter()
            .filter_map(|r| match &r.outcome {
                JobOutcome::Done(_) => None,
                JobOutcome::Failed(err) => Some(TaskFailure {
                    id: r.id.clone(),
                    error: err.to_string(),
                }),
                JobOutcome::Skipped(reason) => Some(TaskFailure {
                    id: r.id.clone(),
                    error: reason.to_string(),
                }),
            })
            .collect();
        println!(
            "Summary: {} succeeded, {} failed",
            converted,
            convert_failures.len()
        );

        Ok(RunOutcome {
            solve,
            converted,
            convert_failures,
        })
    }
}

fn print_banner(title: &str) {
    let line = "=".repeat(60);
    println!("\n{line}");
    println!("{title}");
    println!("{line}");
}

/// Condensed rate table over all reduced tasks: the finest-level rate per
/// tracked quantity.
fn print_rate_summary(reports: &[ConvergenceReport]) {
    if reports.is_empty() {
        println!("No results to reduce");
        return;
    }
    println!(
        "  {:<40} {:>8} {:>8} {:>8} {:>8}",
        "task", QUANTITIES[0], QUANTITIES[1], QUANTITIES[2], QUANTITIES[3]
    );
    for report in reports {
        let cells: Vec<String> = (0..QUANTITIES.len())
            .map(|q| match report.final_rate(q) {
                Some(rate) => format!("{rate:>8.2}"),
                None => format!("{:>8}", "-"),
            })
            .collect();
        println!("  {:<40} {}", report.task_id, cells.join(" "));
    }
}

fn print_solve_summary(outcome: &SolveOutcome) {
    let line = "=".repeat(60);
    println!("\n{line}");
    println!(
        "Summary: {}/{} succeeded",
        outcome.ledger.succeeded(),
        outcome.ledger.tasks.len()
    );
    println!("Ledger: {}", outcome.ledger_path.display());

    if !outcome.generation.failures.is_empty() {
        println!("\nFailed to generate ({}):", outcome.generation.failures.len());
        for failure in &outcome.generation.failures {
            println!("  - {}: {}", failure.id, failure.error);
        }
    }
    let failed: Vec<_> = outcome
        .ledger
        .tasks
        .iter()
        .filter(|t| t.status == crate::execute::TaskStatus::Failed)
        .collect();
    if !failed.is_empty() {
        println!("\nFailed solvers ({}):", failed.len());
        for task in failed {
            println!(
                "  - {}: {}",
                task.id,
                task.diagnostic.as_deref().unwrap_or("unknown")
            );
        }
    }
    if outcome.ledger.skipped() > 0 {
        println!("\nSkipped {} queued tasks", outcome.ledger.skipped());
    }
    if !outcome.report_failures.is_empty() {
        println!("\nUnreadable results ({}):", outcome.report_failures.len());
        for failure in &outcome.report_failures {
            println!("  - {}: {}", failure.id, failure.error);
        }
    }
}
