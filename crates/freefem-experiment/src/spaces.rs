//! Finite-element pairings eligible for each boundary-condition family.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::BoundaryCondition;
use crate::library::ConfigurationError;

/// A mixed space for the vector unknown together with the Lagrange space
/// used for projected scalar quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FespacePair {
    pub mixed: String,
    pub lagrange: String,
}

impl FespacePair {
    pub fn new(mixed: impl Into<String>, lagrange: impl Into<String>) -> Self {
        Self {
            mixed: mixed.into(),
            lagrange: lagrange.into(),
        }
    }
}

impl fmt::Display for FespacePair {
    /// The form used in directory names and filters, e.g. `BDM1_P2`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.mixed, self.lagrange)
    }
}

/// Catalog mapping each boundary-condition family to the pairings a
/// campaign runs for it, in a fixed order.
#[derive(Debug, Clone)]
pub struct PairingTable {
    entries: Vec<(BoundaryCondition, Vec<FespacePair>)>,
}

impl PairingTable {
    pub fn new(entries: Vec<(BoundaryCondition, Vec<FespacePair>)>) -> Self {
        Self { entries }
    }

    /// The standard catalog. The Ortho variants are the rotated elements
    /// whose continuous trace is the tangential one, so they only appear
    /// for the electric and magnetic families.
    pub fn builtin() -> Self {
        let base = vec![
            FespacePair::new("BDM1", "P2"),
            FespacePair::new("BDM2", "P3"),
        ];
        let with_ortho = vec![
            FespacePair::new("BDM1", "P2"),
            FespacePair::new("BDM2", "P3"),
            FespacePair::new("BDM1Ortho", "P2"),
            FespacePair::new("BDM2Ortho", "P3"),
        ];
        Self::new(vec![
            (BoundaryCondition::Dirichlet, base),
            (BoundaryCondition::Electric, with_ortho.clone()),
            (BoundaryCondition::Magnetic, with_ortho),
        ])
    }

    pub fn pairings(&self, bc: BoundaryCondition) -> Result<&[FespacePair], ConfigurationError> {
        self.entries
            .iter()
            .find(|(family, _)| *family == bc)
            .map(|(_, pairs)| pairs.as_slice())
            .ok_or(ConfigurationError::MissingPairings(bc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pairing_counts() {
        let table = PairingTable::builtin();
        assert_eq!(table.pairings(BoundaryCondition::Dirichlet).unwrap().len(), 2);
        assert_eq!(table.pairings(BoundaryCondition::Electric).unwrap().len(), 4);
        assert_eq!(table.pairings(BoundaryCondition::Magnetic).unwrap().len(), 4);
    }

    #[test]
    fn test_pair_display() {
        let pair = FespacePair::new("BDM1Ortho", "P2");
        assert_eq!(pair.to_string(), "BDM1Ortho_P2");
    }

    #[test]
    fn test_missing_family_is_a_configuration_error() {
        let table = PairingTable::new(vec![(
            BoundaryCondition::Dirichlet,
            vec![FespacePair::new("BDM1", "P2")],
        )]);
        let result = table.pairings(BoundaryCondition::Magnetic);
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingPairings(
                BoundaryCondition::Magnetic
            ))
        ));
    }
}
