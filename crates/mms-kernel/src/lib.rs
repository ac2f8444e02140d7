//! MMS Kernel: building blocks for manufactured-solution convergence studies.
//!
//! This crate carries the pieces that have no knowledge of any particular
//! campaign: a small symbolic expression engine (parse, differentiate,
//! simplify, re-serialize in solver syntax), a bounded concurrent task
//! runner with completion-order progress and cooperative cancellation, and
//! the capability boundary around the external solver process.

pub mod expr;
pub mod runner;
pub mod solver;

pub use expr::{Expr, ExprError, Var};
pub use runner::{CancelFlag, JobOutcome, JobReport, RunnerConfig, SkipReason};
pub use solver::{FreeFemEngine, SolverEngine, SolverError, SolverJob, SolverRun};
