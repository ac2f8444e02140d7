//! Script rendering.
//!
//! Turns a task descriptor plus its derived fields into a runnable solver
//! script on disk. Rendering is strict: every placeholder the template
//! references must be supplied, so template drift fails loudly at
//! generation time instead of producing a silently broken script.

use std::fs;
use std::path::{Path, PathBuf};

use minijinja::value::Value;
use minijinja::{context, Environment, UndefinedBehavior};
use thiserror::Error;
use tracing::debug;

use crate::derive::DerivedFieldSet;
use crate::matrix::TaskDescriptor;

/// File name of the rendered script inside each task directory.
pub const SCRIPT_FILE: &str = "solver.edp";
/// File the script writes its per-level errors to.
pub const RESULTS_FILE: &str = "results.dat";
/// Subdirectory the script drops EPS plots into.
pub const EPS_DIR: &str = "eps";
/// Sibling of [`EPS_DIR`], reserved for the conversion stage.
pub const PNG_DIR: &str = "png";

const SOLVER_TEMPLATE: &str = include_str!("../templates/solver.edp.j2");

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mesh parameters shared by every task in a campaign.
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    /// Mesh divisions per side at the coarsest level.
    pub base_mesh: u32,
    /// Refinement levels the script runs by default; overridable at solve
    /// time through the script's `-levels` argument.
    pub refinements: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_mesh: 8,
            refinements: 4,
        }
    }
}

/// Everything the later stages need to run one rendered task.
#[derive(Debug, Clone)]
pub struct RenderedTask {
    pub id: String,
    pub dir: PathBuf,
    pub script: PathBuf,
    pub results_path: PathBuf,
    /// Arguments appended after the script path when the solver runs.
    pub solver_args: Vec<String>,
}

pub struct TaskRenderer {
    env: Environment<'static>,
    config: RenderConfig,
}

impl TaskRenderer {
    pub fn new(config: RenderConfig) -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template(SCRIPT_FILE, SOLVER_TEMPLATE)?;
        Ok(Self { env, config })
    }

    /// Create the task directory, render the script into it, and return
    /// the paths the executor operates on.
    pub fn render(
        &self,
        task: &TaskDescriptor,
        fields: &DerivedFieldSet,
        output_root: &Path,
    ) -> Result<RenderedTask, RenderError> {
        let dir = output_root.join(task.relative_dir());
        fs::create_dir_all(dir.join(EPS_DIR))?;
        fs::create_dir_all(dir.join(PNG_DIR))?;

        let template = self.env.get_template(SCRIPT_FILE)?;
        let script = template.render(context! {
            problem_name => task.problem_name(),
            boundary_condition => task.bc().name(),
            domain => task.domain.name(),
            boundary_labels => task.domain.boundary_labels(),
            mixed_fespace => &task.pair.mixed,
            lagrange_fespace => &task.pair.lagrange,
            base_mesh => self.config.base_mesh,
            refinements => self.config.refinements,
            fields => Value::from_serialize(fields),
        })?;

        let script_path = dir.join(SCRIPT_FILE);
        fs::write(&script_path, script)?;
        debug!(task = %task.id(), path = %script_path.display(), "rendered solver script");

        Ok(RenderedTask {
            id: task.id(),
            script: script_path,
            results_path: dir.join(RESULTS_FILE),
            solver_args: vec![
                "-levels".to_string(),
                self.config.refinements.to_string(),
            ],
            dir,
        })
    }
}
