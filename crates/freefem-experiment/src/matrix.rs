//! Experiment matrix expansion.
//!
//! The campaign matrix is the cross product of solution cases, the domains
//! each case is defined on, and the finite-element pairings registered for
//! the case's boundary-condition family. Expansion is deterministic: tasks
//! come out in library declaration order, then domain order, then pairing
//! order.

use std::path::PathBuf;

use tracing::debug;

use crate::domain::{BoundaryCondition, Domain};
use crate::library::{ConfigurationError, FunctionLibrary, SolutionCase};
use crate::spaces::{FespacePair, PairingTable};

/// One fully specified experiment: a solution case on a domain, discretized
/// with one fespace pairing.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub case: SolutionCase,
    pub domain: Domain,
    pub pair: FespacePair,
}

impl TaskDescriptor {
    pub fn bc(&self) -> BoundaryCondition {
        self.case.bc
    }

    /// Short name shared by all pairings of one problem, e.g.
    /// `Dirichlet_Trig_Square`.
    pub fn task_name(&self) -> String {
        format!("{}_{}_{}", self.case.bc, self.case.short_name(), self.domain)
    }

    /// Unabbreviated problem name used inside generated scripts, e.g.
    /// `Dirichlet_Trigonometric_Square`.
    pub fn problem_name(&self) -> String {
        format!("{}_{}_{}", self.case.bc, self.case.name, self.domain)
    }

    /// Unique identifier, and the string filters match against:
    /// `Dirichlet_Trig_Square/BDM1_P2`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.task_name(), self.pair)
    }

    /// Directory for this task's artifacts, relative to the campaign
    /// output root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.task_name()).join(self.pair.to_string())
    }
}

/// Expand the full matrix, keeping tasks whose identifier contains any of
/// the filter terms. No terms means keep everything.
pub fn expand(
    library: &FunctionLibrary,
    table: &PairingTable,
    filters: &[String],
) -> Result<Vec<TaskDescriptor>, ConfigurationError> {
    let mut tasks = Vec::new();
    for case in library.cases() {
        let pairings = table.pairings(case.bc)?;
        for &domain in &case.domains {
            for pair in pairings {
                let task = TaskDescriptor {
                    case: case.clone(),
                    domain,
                    pair: pair.clone(),
                };
                if filters.is_empty() || filters.iter().any(|term| task.id().contains(term)) {
                    tasks.push(task);
                }
            }
        }
    }
    debug!(count = tasks.len(), "expanded experiment matrix");
    Ok(tasks)
}
