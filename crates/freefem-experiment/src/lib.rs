//! Convergence-study campaigns for mixed finite element discretizations of
//! the vector Laplacian, driven through FreeFEM.
//!
//! A campaign starts from a library of manufactured exact solutions, expands
//! the full matrix of solution x domain x finite-element-space combinations,
//! derives the auxiliary fields each solver script needs symbolically, and
//! renders one self-contained FreeFEM script per task. Solver processes then
//! run with bounded concurrency and per-task fault isolation, and their
//! per-refinement error tables are reduced into observed convergence rates.

pub mod convert;
pub mod derive;
pub mod domain;
pub mod execute;
pub mod library;
pub mod matrix;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod spaces;
