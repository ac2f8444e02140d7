//! Symbolic derivation of the auxiliary fields a solver script needs.
//!
//! From the two components of an exact solution this produces first
//! derivatives, divergence and rotation, their gradients, and the
//! manufactured source term `f = -laplacian(u)`, all rendered back into
//! solver syntax. Derivation is pure and cached per solution case, so a
//! case appearing in many tasks is only differentiated once.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use mms_kernel::expr::{self, ExprError, Var};
use mms_kernel::Expr;

use crate::library::SolutionCase;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("case '{case}' has no second component")]
    MissingComponent { case: String },

    #[error("invalid {component} expression in case '{case}': {source}")]
    Expression {
        case: String,
        component: &'static str,
        #[source]
        source: ExprError,
    },
}

/// Every field the script template consumes, in solver syntax.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedFieldSet {
    pub u1exact: String,
    pub u2exact: String,
    pub u1x: String,
    pub u1y: String,
    pub u2x: String,
    pub u2y: String,
    pub divu: String,
    pub rotu: String,
    pub divux: String,
    pub divuy: String,
    pub rotux: String,
    pub rotuy: String,
    pub f1: String,
    pub f2: String,
}

/// Caching front end over [`derive_fields`]. Cache keys include the
/// boundary-condition family because case names repeat across families
/// with different expressions.
#[derive(Debug, Default)]
pub struct FieldDeriver {
    cache: DashMap<String, Arc<DerivedFieldSet>>,
}

impl FieldDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn derive(&self, case: &SolutionCase) -> Result<Arc<DerivedFieldSet>, DerivationError> {
        let key = format!("{}/{}", case.bc, case.name);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Arc::clone(&hit));
        }
        debug!(case = %key, "deriving auxiliary fields");
        let fields = Arc::new(derive_fields(case)?);
        self.cache.insert(key, Arc::clone(&fields));
        Ok(fields)
    }
}

/// Differentiate one solution case into the full field set.
pub fn derive_fields(case: &SolutionCase) -> Result<DerivedFieldSet, DerivationError> {
    let u2_src = case
        .u2
        .as_deref()
        .ok_or_else(|| DerivationError::MissingComponent {
            case: case.name.clone(),
        })?;
    let u1 = parse_component(case, "u1", &case.u1)?.simplified();
    let u2 = parse_component(case, "u2", u2_src)?.simplified();

    let u1x = u1.diff(Var::X);
    let u1y = u1.diff(Var::Y);
    let u2x = u2.diff(Var::X);
    let u2y = u2.diff(Var::Y);

    let divu = u1x.clone() + u2y.clone();
    let rotu = u2x.clone() - u1y.clone();

    let f1 = -(u1x.diff(Var::X) + u1y.diff(Var::Y));
    let f2 = -(u2x.diff(Var::X) + u2y.diff(Var::Y));

    Ok(DerivedFieldSet {
        u1exact: u1.to_string(),
        u2exact: u2.to_string(),
        u1x: u1x.to_string(),
        u1y: u1y.to_string(),
        u2x: u2x.to_string(),
        u2y: u2y.to_string(),
        divu: divu.to_string(),
        rotu: rotu.to_string(),
        divux: divu.diff(Var::X).to_string(),
        divuy: divu.diff(Var::Y).to_string(),
        rotux: rotu.diff(Var::X).to_string(),
        rotuy: rotu.diff(Var::Y).to_string(),
        f1: f1.to_string(),
        f2: f2.to_string(),
    })
}

fn parse_component(
    case: &SolutionCase,
    component: &'static str,
    src: &str,
) -> Result<Expr, DerivationError> {
    expr::parse(src).map_err(|source| DerivationError::Expression {
        case: case.name.clone(),
        component,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use crate::domain::BoundaryCondition;
    use crate::library::FunctionLibrary;

    const POINTS: [(f64, f64); 3] = [(0.3, 0.7), (0.6, 0.4), (0.15, 0.85)];

    fn builtin_case(bc: BoundaryCondition, name: &str) -> SolutionCase {
        FunctionLibrary::builtin()
            .cases()
            .iter()
            .find(|c| c.bc == bc && c.name == name)
            .cloned()
            .unwrap()
    }

    fn eval(src: &str, x: f64, y: f64) -> f64 {
        expr::parse(src).unwrap().eval(x, y)
    }

    #[test]
    fn test_trig_source_term() {
        let case = builtin_case(BoundaryCondition::Dirichlet, "Trigonometric");
        let fields = derive_fields(&case).unwrap();
        let pi = std::f64::consts::PI;
        for (x, y) in POINTS {
            let expected = 2.0 * pi * pi * (pi * x).sin() * (pi * y).sin();
            assert_relative_eq!(eval(&fields.f1, x, y), expected, max_relative = 1e-9);
            assert_relative_eq!(eval(&fields.f2, x, y), expected, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_divergence_of_rotational_field_vanishes() {
        let case = builtin_case(BoundaryCondition::Dirichlet, "Ruas");
        let fields = derive_fields(&case).unwrap();
        for (x, y) in [(0.3, 0.2), (-0.4, 0.5), (0.1, -0.6)] {
            assert_abs_diff_eq!(eval(&fields.divu, x, y), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(eval(&fields.divux, x, y), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(eval(&fields.divuy, x, y), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_first_derivatives_match_finite_differences() {
        let h = 1e-6;
        for case in FunctionLibrary::builtin().cases() {
            let fields = derive_fields(case).unwrap();
            for (x, y) in POINTS {
                let fd_x = (eval(&fields.u1exact, x + h, y) - eval(&fields.u1exact, x - h, y))
                    / (2.0 * h);
                let fd_y = (eval(&fields.u2exact, x, y + h) - eval(&fields.u2exact, x, y - h))
                    / (2.0 * h);
                assert_relative_eq!(
                    eval(&fields.u1x, x, y),
                    fd_x,
                    max_relative = 1e-4,
                    epsilon = 1e-6
                );
                assert_relative_eq!(
                    eval(&fields.u2y, x, y),
                    fd_y,
                    max_relative = 1e-4,
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn test_divergence_and_rotation_identities() {
        for case in FunctionLibrary::builtin().cases() {
            let fields = derive_fields(case).unwrap();
            for (x, y) in POINTS {
                let divu = eval(&fields.u1x, x, y) + eval(&fields.u2y, x, y);
                let rotu = eval(&fields.u2x, x, y) - eval(&fields.u1y, x, y);
                assert_relative_eq!(
                    eval(&fields.divu, x, y),
                    divu,
                    max_relative = 1e-9,
                    epsilon = 1e-12
                );
                assert_relative_eq!(
                    eval(&fields.rotu, x, y),
                    rotu,
                    max_relative = 1e-9,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_missing_second_component() {
        let mut case = builtin_case(BoundaryCondition::Dirichlet, "Ruas");
        case.u2 = None;
        let result = derive_fields(&case);
        assert!(matches!(
            result,
            Err(DerivationError::MissingComponent { .. })
        ));
    }

    #[test]
    fn test_invalid_expression_names_component() {
        let mut case = builtin_case(BoundaryCondition::Dirichlet, "Ruas");
        case.u2 = Some("sin(".to_string());
        match derive_fields(&case) {
            Err(DerivationError::Expression { component, .. }) => assert_eq!(component, "u2"),
            other => panic!("expected expression error, got {other:?}"),
        }
    }

    #[test]
    fn test_deriver_caches_per_case() {
        let deriver = FieldDeriver::new();
        let case = builtin_case(BoundaryCondition::Electric, "Trigonometric");
        let first = deriver.derive(&case).unwrap();
        let second = deriver.derive(&case).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cache_keys_include_family() {
        let deriver = FieldDeriver::new();
        let electric = deriver
            .derive(&builtin_case(BoundaryCondition::Electric, "Trigonometric"))
            .unwrap();
        let magnetic = deriver
            .derive(&builtin_case(BoundaryCondition::Magnetic, "Trigonometric"))
            .unwrap();
        assert_ne!(electric.u1exact, magnetic.u1exact);
    }
}
