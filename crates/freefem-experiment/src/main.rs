//! FreeFEM convergence-study CLI.
//!
//! Commands:
//! - generate: Expand the matrix and render solver scripts
//! - solve: Generate, run the solvers, reduce convergence rates
//! - run: Full campaign including plot conversion
//! - list: Show the expanded task matrix

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use freefem_experiment::convert::{ConvertConfig, ImageFormat};
use freefem_experiment::execute::ExecutionConfig;
use freefem_experiment::library::FunctionLibrary;
use freefem_experiment::pipeline::{Campaign, CampaignOptions};
use freefem_experiment::render::RenderConfig;
use freefem_experiment::spaces::PairingTable;
use mms_kernel::CancelFlag;

#[derive(Parser)]
#[command(name = "freefem-experiment")]
#[command(version)]
#[command(about = "Mixed finite element convergence studies via FreeFEM")]
struct Cli {
    /// Root directory for generated tasks and results
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Only process tasks whose id contains one of these substrings
    /// (comma-separated), e.g. "Trig,BDM1"
    #[arg(long, value_delimiter = ',')]
    filter: Vec<String>,

    /// TOML solution library; defaults to the built-in cases
    #[arg(long)]
    library: Option<PathBuf>,

    /// FreeFEM executable
    #[arg(long = "solver-cmd", env = "FREEFEM_CMD", default_value = "FreeFem++")]
    solver_cmd: String,

    /// Parallel solver processes (0 = one per CPU)
    #[arg(short, long, default_value = "0")]
    jobs: usize,

    /// Per-task solver timeout in seconds
    #[arg(long, default_value = "600")]
    timeout: u64,

    /// Wall-clock budget for the whole run in seconds; tasks not yet
    /// started when it expires are skipped
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Mesh refinement levels per task
    #[arg(long, default_value = "4")]
    refinements: u32,

    /// Mesh divisions per side at the coarsest level
    #[arg(long, default_value = "8")]
    base_mesh: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render solver scripts without running them
    Generate,

    /// Generate, run the solvers, and reduce convergence rates
    Solve,

    /// Full campaign: solve, then convert EPS plots
    Run {
        /// Raster resolution for converted plots
        #[arg(long, default_value = "150")]
        dpi: u32,

        /// Output image format. Valid: png, pdf, jpg
        #[arg(long, default_value = "png")]
        format: String,

        /// Treat plot-conversion failures as campaign failures
        #[arg(long)]
        strict: bool,
    },

    /// Show the expanded task matrix
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let library = load_library(cli.library.as_deref())?;
    let jobs = if cli.jobs == 0 { num_cpus::get() } else { cli.jobs };

    let mut options = CampaignOptions {
        output_root: cli.output,
        filters: cli.filter,
        library,
        pairings: PairingTable::builtin(),
        render: RenderConfig {
            base_mesh: cli.base_mesh,
            refinements: cli.refinements,
        },
        execution: ExecutionConfig {
            max_workers: jobs,
            task_timeout: Duration::from_secs(cli.timeout),
            run_deadline: cli.run_timeout.map(Duration::from_secs),
        },
        convert: ConvertConfig::default(),
        solver_command: cli.solver_cmd,
        strict: false,
    };

    match cli.command {
        Commands::List => {
            let campaign = Campaign::new(options)?;
            let tasks = campaign.expand()?;

            println!("\n=== Task Matrix ===");
            println!("  {:<26} {:<16} {:<8} {:<10}", "problem", "fespace", "domain", "bc");
            for task in &tasks {
                println!(
                    "  {:<26} {:<16} {:<8} {:<10}",
                    task.task_name(),
                    task.pair.to_string(),
                    task.domain.name(),
                    task.bc().name()
                );
            }
            println!("\nTotal: {} tasks", tasks.len());
        }

        Commands::Generate => {
            let campaign = Campaign::new(options)?;
            let generation = campaign.generate()?;

            println!("\n=== Generation Complete ===");
            println!(
                "Rendered {}/{} scripts under {}",
                generation.rendered.len(),
                generation.total,
                campaign.options().output_root.display()
            );
            if !generation.failures.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Solve => {
            let campaign = Campaign::new(options)?;
            let cancel = watch_for_ctrl_c();
            let started = Instant::now();

            let outcome = campaign.solve(&cancel).await?;
            if outcome.is_clean() {
                println!(
                    "\n[SUCCESS] Campaign completed in {:.1}s",
                    started.elapsed().as_secs_f64()
                );
            } else {
                println!("\n[FAIL] Campaign finished with failures");
                std::process::exit(1);
            }
        }

        Commands::Run {
            dpi,
            format,
            strict,
        } => {
            options.convert = ConvertConfig {
                format: parse_format(&format)?,
                dpi,
                max_workers: jobs,
                ..Default::default()
            };
            options.strict = strict;
            let campaign = Campaign::new(options)?;
            let cancel = watch_for_ctrl_c();
            let started = Instant::now();

            let outcome = campaign.run(&cancel).await?;
            let convert_clean = outcome.convert_failures.is_empty() || !strict;
            if outcome.solve.is_clean() && convert_clean {
                println!(
                    "\n[SUCCESS] Campaign completed in {:.1}s",
                    started.elapsed().as_secs_f64()
                );
            } else {
                println!("\n[FAIL] Campaign finished with failures");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// On Ctrl-C, trigger cooperative cancellation: running solvers finish,
/// queued tasks are skipped.
fn watch_for_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n[ABORT] Interrupted, letting running solvers finish");
            flag.trigger();
        }
    });
    cancel
}

fn load_library(path: Option<&Path>) -> Result<FunctionLibrary> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading solution library");
            Ok(FunctionLibrary::from_file(path)?)
        }
        None => Ok(FunctionLibrary::builtin()),
    }
}

fn parse_format(s: &str) -> Result<ImageFormat> {
    match s.to_lowercase().as_str() {
        "png" => Ok(ImageFormat::Png),
        "pdf" => Ok(ImageFormat::Pdf),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
        _ => anyhow::bail!("Unknown format: {}. Valid: png, pdf, jpg", s),
    }
}
