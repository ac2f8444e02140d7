//! Geometry and boundary-condition vocabulary shared across the campaign.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Computational domains the script template knows how to mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// Unit square `(0,1)^2`, labels 1-4.
    Square,
    /// `(-1,1)^2` with the closed fourth quadrant removed, labels 1-6.
    Lshaped,
    /// Unit disk centred at the origin, label 1.
    Circle,
}

impl Domain {
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Square => "Square",
            Domain::Lshaped => "Lshaped",
            Domain::Circle => "Circle",
        }
    }

    /// Border labels as they appear in an `on(...)` clause.
    pub fn boundary_labels(&self) -> &'static str {
        match self {
            Domain::Square => "1, 2, 3, 4",
            Domain::Lshaped => "1, 2, 3, 4, 5, 6",
            Domain::Circle => "1",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Boundary condition imposed on the vector unknown.
///
/// Dirichlet pins both components on the boundary. The electric condition
/// constrains the tangential trace, the magnetic one the normal trace; the
/// complementary first-order quantity enters weakly in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryCondition {
    Dirichlet,
    Electric,
    Magnetic,
}

impl BoundaryCondition {
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryCondition::Dirichlet => "Dirichlet",
            BoundaryCondition::Electric => "Electric",
            BoundaryCondition::Magnetic => "Magnetic",
        }
    }
}

impl fmt::Display for BoundaryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
