//! Command interface of the external nonlinear solver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::config::AnalysisKind;
use crate::error::SolverResult;

/// Convergence test families understood by the solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceTestKind {
    NormUnbalance,
    NormDispIncr,
    #[default]
    EnergyIncr,
    RelativeNormUnbalance,
    RelativeNormDispIncr,
    RelativeTotalNormDispIncr,
    RelativeEnergyIncr,
    FixedNumIter,
}

impl fmt::Display for ConvergenceTestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NormUnbalance => "NormUnbalance",
            Self::NormDispIncr => "NormDispIncr",
            Self::EnergyIncr => "EnergyIncr",
            Self::RelativeNormUnbalance => "RelativeNormUnbalance",
            Self::RelativeNormDispIncr => "RelativeNormDispIncr",
            Self::RelativeTotalNormDispIncr => "RelativeTotalNormDispIncr",
            Self::RelativeEnergyIncr => "RelativeEnergyIncr",
            Self::FixedNumIter => "FixedNumIter",
        };
        f.write_str(name)
    }
}

/// A fully specified convergence test command.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTest {
    pub kind: ConvergenceTestKind,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub print_flag: i32,
}

/// The external solver as seen by the adaptive driver.
///
/// Configuration commands return `Err` only when the solver rejects the
/// command itself. Non-convergence is reported through the status code of
/// [`analyze_one_step`](ExternalSolver::analyze_one_step).
pub trait ExternalSolver {
    /// Replace the convergence test.
    fn set_convergence_test(&mut self, test: &ConvergenceTest) -> SolverResult<()>;

    /// Replace the nonlinear iteration algorithm.
    fn set_algorithm(&mut self, algorithm: &Algorithm) -> SolverResult<()>;

    /// Configure displacement control of `dof` at `node` with the given step.
    /// Only used for static analysis.
    fn set_displacement_control(
        &mut self,
        node: usize,
        dof: usize,
        step: f64,
    ) -> SolverResult<()>;

    /// Select the analysis type before the first step.
    fn set_analysis(&mut self, kind: AnalysisKind) -> SolverResult<()>;

    /// Run one analysis step. `Some(dt)` for transient analysis, `None` for
    /// static analysis (the step comes from displacement control).
    ///
    /// Returns 0 when the step converged.
    fn analyze_one_step(&mut self, dt: Option<f64>) -> i32;

    /// Norms recorded by the convergence test during the last step.
    fn last_test_norms(&mut self) -> Vec<f64>;
}
