//! Convergence-rate reduction.
//!
//! Parses the per-level error files the solver leaves behind, computes
//! observed convergence rates between successive refinements, and renders
//! a fixed-width text report per task.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use chrono::Local;
use thiserror::Error;

/// File name of the rendered report inside each task directory.
pub const REPORT_FILE: &str = "report.txt";

/// Display labels for the tracked error quantities, in results-file
/// column order.
pub const QUANTITIES: [&str; 4] = ["u", "div u", "rot u", "p"];

/// Mesh resolution plus the four tracked errors per results row.
const FIELDS_PER_ROW: usize = 1 + QUANTITIES.len();

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("results file is empty")]
    Empty,

    #[error("line {line}: expected 5 fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: invalid number '{token}'")]
    Number { line: usize, token: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One refinement level: mesh divisions per side and the tracked errors.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelErrors {
    pub n: u32,
    pub errors: [f64; 4],
}

/// Parse the whitespace-separated rows of a results file.
pub fn parse_results(text: &str) -> Result<Vec<LevelErrors>, ParseError> {
    let mut levels = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != FIELDS_PER_ROW {
            return Err(ParseError::FieldCount {
                line: line_no,
                found: fields.len(),
            });
        }
        let n = fields[0].parse::<u32>().map_err(|_| ParseError::Number {
            line: line_no,
            token: fields[0].to_string(),
        })?;
        let mut errors = [0.0; 4];
        for (k, token) in fields[1..].iter().enumerate() {
            errors[k] = token.parse::<f64>().map_err(|_| ParseError::Number {
                line: line_no,
                token: (*token).to_string(),
            })?;
        }
        levels.push(LevelErrors { n, errors });
    }
    if levels.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(levels)
}

/// Observed rate between successive levels: `log2(e_prev / e_cur)`.
///
/// The first level has no predecessor; degenerate errors (zero, negative,
/// or non-finite) yield no rate rather than a misleading number.
pub fn rates(errors: &[f64]) -> Vec<Option<f64>> {
    errors
        .iter()
        .enumerate()
        .map(|(i, &e)| {
            if i == 0 {
                return None;
            }
            let prev = errors[i - 1];
            if prev > 0.0 && e > 0.0 && prev.is_finite() && e.is_finite() {
                Some((prev / e).log2())
            } else {
                None
            }
        })
        .collect()
}

/// Parsed convergence history for one task.
#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    pub task_id: String,
    pub levels: Vec<LevelErrors>,
}

impl ConvergenceReport {
    pub fn from_file(task_id: impl Into<String>, path: &Path) -> Result<Self, ParseError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self {
            task_id: task_id.into(),
            levels: parse_results(&text)?,
        })
    }

    /// Rates for one tracked quantity, by column index into [`QUANTITIES`].
    pub fn rates_for(&self, quantity: usize) -> Vec<Option<f64>> {
        let errors: Vec<f64> = self.levels.iter().map(|l| l.errors[quantity]).collect();
        rates(&errors)
    }

    /// Rate observed at the finest refinement, if any.
    pub fn final_rate(&self, quantity: usize) -> Option<f64> {
        self.rates_for(quantity).into_iter().rev().find_map(|r| r)
    }

    /// Render the fixed-width text report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let banner = "=".repeat(60);
        let _ = writeln!(out, "{banner}");
        let _ = writeln!(out, "Convergence report: {}", self.task_id);
        let _ = writeln!(out, "Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Levels: {}", self.levels.len());
        let _ = writeln!(out, "{banner}");

        for (q, label) in QUANTITIES.iter().enumerate() {
            let rates = self.rates_for(q);
            let _ = writeln!(out);
            let _ = writeln!(out, "L2 error of {label}");
            let _ = writeln!(out, "{:>8} {:>13} {:>8}", "n", "error", "rate");
            for (level, rate) in self.levels.iter().zip(&rates) {
                match rate {
                    Some(r) => {
                        let _ = writeln!(
                            out,
                            "{:>8} {:>13.6e} {:>8.2}",
                            level.n, level.errors[q], r
                        );
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "{:>8} {:>13.6e} {:>8}",
                            level.n, level.errors[q], "-"
                        );
                    }
                }
            }
        }
        out
    }

    /// Write the rendered report next to the results it was reduced from.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    const SAMPLE: &str = "\
8 1.0e-2 2.0e-2 4.0e-2 8.0e-2
16 2.5e-3 5.0e-3 1.0e-2 2.0e-2
32 6.25e-4 1.25e-3 2.5e-3 5.0e-3
";

    #[test]
    fn test_parse_results() {
        let levels = parse_results(SAMPLE).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].n, 8);
        assert_eq!(levels[2].n, 32);
        assert_relative_eq!(levels[1].errors[0], 2.5e-3);
        assert_relative_eq!(levels[0].errors[3], 8.0e-2);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let levels = parse_results("8 1 1 1 1\n\n16 2 2 2 2\n").unwrap();
        assert_eq!(levels.len(), 2);
    }

    #[test]
    fn test_empty_results_rejected() {
        assert!(matches!(parse_results(""), Err(ParseError::Empty)));
        assert!(matches!(parse_results("  \n\n"), Err(ParseError::Empty)));
    }

    #[test]
    fn test_field_count_reports_line() {
        let result = parse_results("8 1 1 1 1\n16 2 2\n");
        match result {
            Err(ParseError::FieldCount { line, found }) => {
                assert_eq!(line, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected field-count error, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_number_reports_token() {
        let result = parse_results("8 1 oops 1 1\n");
        match result {
            Err(ParseError::Number { line, token }) => {
                assert_eq!(line, 1);
                assert_eq!(token, "oops");
            }
            other => panic!("expected number error, got {other:?}"),
        }
    }

    #[test]
    fn test_rates_for_quartered_errors() {
        let computed = rates(&[1.0e-2, 2.5e-3, 6.25e-4]);
        assert_eq!(computed[0], None);
        assert_relative_eq!(computed[1].unwrap(), 2.0);
        assert_relative_eq!(computed[2].unwrap(), 2.0);
    }

    #[test]
    fn test_rates_for_measured_error_sequence() {
        let computed = rates(&[1.234e-1, 3.089e-2, 7.721e-3, 1.930e-3]);
        assert_eq!(computed[0], None);
        for rate in computed.iter().skip(1) {
            assert_relative_eq!(rate.unwrap(), 2.0, epsilon = 0.01);
        }
    }

    #[test]
    fn test_degenerate_errors_have_no_rate() {
        let computed = rates(&[1.0e-2, 0.0, 6.25e-4]);
        assert_eq!(computed, vec![None, None, None]);
        let computed = rates(&[f64::NAN, 1.0e-3]);
        assert_eq!(computed, vec![None, None]);
    }

    #[test]
    fn test_report_render() {
        let report = ConvergenceReport {
            task_id: "Dirichlet_Trig_Square/BDM1_P2".to_string(),
            levels: parse_results(SAMPLE).unwrap(),
        };

        let text = report.render();
        assert!(text.contains("Convergence report: Dirichlet_Trig_Square/BDM1_P2"));
        assert!(text.contains("Levels: 3"));
        for label in QUANTITIES {
            assert!(text.contains(&format!("L2 error of {label}")));
        }
        // First level has no rate, later levels show the observed order.
        assert!(text.contains(" -"));
        assert!(text.contains("2.00"));
    }

    #[test]
    fn test_final_rate_uses_finest_levels() {
        let report = ConvergenceReport {
            task_id: "t".to_string(),
            levels: parse_results("8 1e-1 1 1 1\n16 2.5e-2 1 1 1\n32 3.125e-3 1 1 1\n").unwrap(),
        };
        assert_relative_eq!(report.final_rate(0).unwrap(), 3.0);
        // Constant errors give rate zero at every step.
        assert_relative_eq!(report.final_rate(1).unwrap(), 0.0);
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let report = ConvergenceReport {
            task_id: "t".to_string(),
            levels: parse_results(SAMPLE).unwrap(),
        };
        let path = dir.path().join(REPORT_FILE);
        report.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Convergence report: t"));
    }
}
