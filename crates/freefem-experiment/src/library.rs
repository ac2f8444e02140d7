//! The manufactured-solution library.
//!
//! Each entry names an exact vector solution, the boundary-condition family
//! it verifies, and the domains it is defined on. A built-in catalog covers
//! the standard cases; campaigns can substitute their own catalog from a
//! TOML file using the same `[[case]]` layout.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{BoundaryCondition, Domain};

/// Errors raised while assembling a campaign configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("duplicate solution case '{bc}/{name}'")]
    DuplicateCase { bc: BoundaryCondition, name: String },

    #[error("solution case '{bc}/{name}' lists no domains")]
    EmptyDomains { bc: BoundaryCondition, name: String },

    #[error("no finite-element pairings registered for {0} problems")]
    MissingPairings(BoundaryCondition),
}

/// One manufactured solution: closed-form expressions for both components
/// of the exact vector field, valid on a set of domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionCase {
    pub bc: BoundaryCondition,
    pub name: String,
    /// Short form used in task names and directories; defaults to `name`.
    #[serde(default)]
    pub abbrev: Option<String>,
    #[serde(default)]
    pub description: String,
    pub domains: Vec<Domain>,
    /// First component of the exact solution, in x/y infix syntax.
    pub u1: String,
    /// Second component; cases that omit it fail at derivation time.
    #[serde(default)]
    pub u2: Option<String>,
}

impl SolutionCase {
    pub fn short_name(&self) -> &str {
        self.abbrev.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    #[serde(default, rename = "case")]
    cases: Vec<SolutionCase>,
}

/// Ordered collection of solution cases. Declaration order is preserved so
/// matrix expansion and reports stay deterministic.
#[derive(Debug, Clone)]
pub struct FunctionLibrary {
    cases: Vec<SolutionCase>,
}

impl FunctionLibrary {
    pub fn new(cases: Vec<SolutionCase>) -> Result<Self, ConfigurationError> {
        let library = Self { cases };
        library.validate()?;
        Ok(library)
    }

    /// The standard verification catalog.
    pub fn builtin() -> Self {
        Self {
            cases: vec![
                SolutionCase {
                    bc: BoundaryCondition::Dirichlet,
                    name: "Trigonometric".to_string(),
                    abbrev: Some("Trig".to_string()),
                    description: "Product of sines, vanishing on the boundary".to_string(),
                    domains: vec![Domain::Square, Domain::Lshaped],
                    u1: "sin(pi*x)*sin(pi*y)".to_string(),
                    u2: Some("sin(pi*x)*sin(pi*y)".to_string()),
                },
                SolutionCase {
                    bc: BoundaryCondition::Dirichlet,
                    name: "Bercovier_Engelman".to_string(),
                    abbrev: Some("BercEng".to_string()),
                    description: "Bercovier-Engelman polynomial field".to_string(),
                    domains: vec![Domain::Square],
                    u1: "-256*y*(y-1)*(2*y-1)*x^2*(x-1)^2".to_string(),
                    u2: Some("256*x*(x-1)*(2*x-1)*y^2*(y-1)^2".to_string()),
                },
                SolutionCase {
                    bc: BoundaryCondition::Dirichlet,
                    name: "Ruas".to_string(),
                    abbrev: None,
                    description: "Ruas rotational field on the unit disk".to_string(),
                    domains: vec![Domain::Circle],
                    u1: "y*(x^2+y^2-1)".to_string(),
                    u2: Some("-x*(x^2+y^2-1)".to_string()),
                },
                SolutionCase {
                    bc: BoundaryCondition::Electric,
                    name: "Trigonometric".to_string(),
                    abbrev: Some("Trig".to_string()),
                    description: "Trigonometric field with vanishing tangential trace".to_string(),
                    domains: vec![Domain::Square, Domain::Lshaped],
                    u1: "sin(pi*y)*cos(pi*x)".to_string(),
                    u2: Some("2*sin(pi*x)*cos(pi*y)".to_string()),
                },
                SolutionCase {
                    bc: BoundaryCondition::Magnetic,
                    name: "Trigonometric".to_string(),
                    abbrev: Some("Trig".to_string()),
                    description: "Trigonometric field with vanishing normal trace".to_string(),
                    domains: vec![Domain::Square, Domain::Lshaped],
                    u1: "sin(pi*x)*cos(pi*y)".to_string(),
                    u2: Some("2*sin(pi*y)*cos(pi*x)".to_string()),
                },
            ],
        }
    }

    /// Load a catalog from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        debug!(path = %path.display(), "loading solution library");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a catalog from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        let file: LibraryFile = toml::from_str(text)?;
        Self::new(file.cases)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for case in &self.cases {
            if !seen.insert((case.bc, case.name.clone())) {
                return Err(ConfigurationError::DuplicateCase {
                    bc: case.bc,
                    name: case.name.clone(),
                });
            }
            if case.domains.is_empty() {
                return Err(ConfigurationError::EmptyDomains {
                    bc: case.bc,
                    name: case.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn cases(&self) -> &[SolutionCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
