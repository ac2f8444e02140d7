//! EPS plot conversion through Ghostscript.
//!
//! The solver leaves vector plots under each task's `eps/` directory.
//! Conversion mirrors that layout into a sibling directory named after the
//! target format, e.g. `eps/u_8.eps` becomes `png/u_8.png`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use mms_kernel::runner::{run_all, JobReport, RunnerConfig};
use mms_kernel::solver::run_command;
use mms_kernel::{CancelFlag, SolverError};

use crate::render::EPS_DIR;

/// Output formats Ghostscript can produce from the EPS plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Pdf,
    Jpg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Pdf => "pdf",
            ImageFormat::Jpg => "jpg",
        }
    }

    fn device(self) -> &'static str {
        match self {
            ImageFormat::Png => "png16m",
            ImageFormat::Pdf => "pdfwrite",
            ImageFormat::Jpg => "jpeg",
        }
    }
}

fn ghostscript_command() -> &'static str {
    if cfg!(windows) { "gswin64c" } else { "gs" }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Process(#[from] SolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversion failed: {0}")]
    Failed(String),

    #[error("converted file was not created")]
    MissingOutput,
}

#[derive(Debug, Clone, Copy)]
pub struct ConvertConfig {
    pub format: ImageFormat,
    pub dpi: u32,
    pub max_workers: usize,
    pub timeout: Duration,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            dpi: 150,
            max_workers: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// All plot files under `root`, restricted to `eps/` directories so stray
/// EPS artifacts elsewhere are left alone.
pub fn find_eps_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "eps")
                && path
                    .parent()
                    .and_then(Path::file_name)
                    .is_some_and(|dir| dir == EPS_DIR)
        })
        .collect()
}

/// Destination for one EPS file: a sibling directory named after the
/// format, same file stem.
fn output_path(eps: &Path, format: ImageFormat) -> Option<PathBuf> {
    let task_dir = eps.parent()?.parent()?;
    let name = Path::new(eps.file_stem()?).with_extension(format.extension());
    Some(task_dir.join(format.extension()).join(name))
}

/// Convert every EPS plot under `root` with bounded concurrency.
pub async fn convert_all(
    root: &Path,
    config: &ConvertConfig,
    cancel: &CancelFlag,
) -> Vec<JobReport<PathBuf, ConvertError>> {
    let files = find_eps_files(root);
    let runner_config = RunnerConfig {
        max_workers: config.max_workers,
        deadline: None,
    };
    let config = *config;
    run_all(
        files,
        &runner_config,
        cancel,
        |path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        },
        |eps| async move { convert_one(&eps, &config).await },
    )
    .await
}

async fn convert_one(eps: &Path, config: &ConvertConfig) -> Result<PathBuf, ConvertError> {
    let output = output_path(eps, config.format)
        .ok_or_else(|| ConvertError::Failed("plot is not inside a task directory".to_string()))?;
    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let args = vec![
        "-dSAFER".to_string(),
        "-dBATCH".to_string(),
        "-dNOPAUSE".to_string(),
        "-dEPSCrop".to_string(),
        format!("-sDEVICE={}", config.format.device()),
        format!("-r{}", config.dpi),
        format!("-sOutputFile={}", output.display()),
        eps.display().to_string(),
    ];
    debug!(eps = %eps.display(), out = %output.display(), "converting plot");
    let run = run_command(ghostscript_command(), &args, None, config.timeout).await?;

    if !run.success() {
        return Err(ConvertError::Failed(truncate_stderr(&run.stderr)));
    }
    if !output.exists() {
        return Err(ConvertError::MissingOutput);
    }
    Ok(output)
}

fn truncate_stderr(stderr: &str) -> String {
    stderr.trim().chars().take(100).collect()
}
