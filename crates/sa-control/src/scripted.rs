//! Rule-driven stand-in for an external solver.
//!
//! [`ScriptedSolver`] decides convergence from declarative
//! [`ConvergenceRules`] instead of doing any mechanics, and records every
//! command it receives. It is used to rehearse control settings and to test
//! the driver.

use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::config::AnalysisKind;
use crate::error::{SolverError, SolverResult};
use crate::solver::{ConvergenceTest, ExternalSolver};

/// Conditions under which a scripted step converges. All set conditions
/// must hold.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvergenceRules {
    /// Steps larger in magnitude than this fail.
    pub max_step: Option<f64>,
    /// Only these algorithm codes converge.
    pub algorithms: Option<Vec<u32>>,
    /// Iteration limits below this fail.
    pub min_iterations: Option<u32>,
    /// Tolerances tighter than this fail.
    pub min_tolerance: Option<f64>,
    /// 1-based analyze calls that fail regardless of the other rules.
    pub fail_calls: Vec<usize>,
    pub never_converge: bool,
    /// Last test norm reported after a failed step (default 1.0).
    pub failure_norm: Option<f64>,
    /// User algorithm slots the solver accepts.
    pub user_slots: Vec<u8>,
}

/// A command accepted by the scripted solver.
#[derive(Clone, Debug, PartialEq)]
pub enum SolverCall {
    Test(ConvergenceTest),
    Algorithm(Algorithm),
    DisplacementControl { node: usize, dof: usize, step: f64 },
    Analysis(AnalysisKind),
    Analyze { step: f64, converged: bool },
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedSolver {
    rules: ConvergenceRules,
    calls: Vec<SolverCall>,
    test: Option<ConvergenceTest>,
    algorithm: Option<Algorithm>,
    control: Option<(usize, usize, f64)>,
    analysis: Option<AnalysisKind>,
    analyze_count: usize,
    position: f64,
    time: f64,
    last_norms: Vec<f64>,
}

impl ScriptedSolver {
    pub fn new(rules: ConvergenceRules) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    /// Solver on which every step converges.
    pub fn converging() -> Self {
        Self::new(ConvergenceRules::default())
    }

    pub fn calls(&self) -> &[SolverCall] {
        &self.calls
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn test(&self) -> Option<ConvergenceTest> {
        self.test
    }

    pub fn analysis(&self) -> Option<AnalysisKind> {
        self.analysis
    }

    pub fn analyze_count(&self) -> usize {
        self.analyze_count
    }

    /// Controlled displacement reached by converged static steps.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Time reached by converged transient steps.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn algorithm_changes(&self) -> usize {
        self.count(|c| matches!(c, SolverCall::Algorithm(_)))
    }

    pub fn test_changes(&self) -> usize {
        self.count(|c| matches!(c, SolverCall::Test(_)))
    }

    pub fn control_changes(&self) -> usize {
        self.count(|c| matches!(c, SolverCall::DisplacementControl { .. }))
    }

    /// Steps of every analyze call, converged or not, in call order.
    pub fn attempted_steps(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SolverCall::Analyze { step, .. } => Some(*step),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&SolverCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn converges(&self, step: f64) -> bool {
        let rules = &self.rules;
        if rules.never_converge || rules.fail_calls.contains(&self.analyze_count) {
            return false;
        }
        if let Some(max_step) = rules.max_step {
            if step.abs() > max_step {
                return false;
            }
        }
        if let Some(codes) = &rules.algorithms {
            match self.algorithm {
                Some(algorithm) if codes.contains(&algorithm.code()) => {}
                _ => return false,
            }
        }
        // An unconfigured test counts as the strictest one.
        if let Some(min_iterations) = rules.min_iterations {
            if self.test.map_or(0, |t| t.max_iterations) < min_iterations {
                return false;
            }
        }
        if let Some(min_tolerance) = rules.min_tolerance {
            if self.test.map_or(0.0, |t| t.tolerance) < min_tolerance {
                return false;
            }
        }
        true
    }
}

impl ExternalSolver for ScriptedSolver {
    fn set_convergence_test(&mut self, test: &ConvergenceTest) -> SolverResult<()> {
        self.test = Some(*test);
        self.calls.push(SolverCall::Test(*test));
        Ok(())
    }

    fn set_algorithm(&mut self, algorithm: &Algorithm) -> SolverResult<()> {
        if let Algorithm::User { slot } = *algorithm {
            if !self.rules.user_slots.contains(&slot) {
                return Err(SolverError::Rejected {
                    command: "algorithm",
                    message: format!("no user algorithm registered in slot {slot}"),
                });
            }
        }
        self.algorithm = Some(*algorithm);
        self.calls.push(SolverCall::Algorithm(*algorithm));
        Ok(())
    }

    fn set_displacement_control(
        &mut self,
        node: usize,
        dof: usize,
        step: f64,
    ) -> SolverResult<()> {
        if step == 0.0 || !step.is_finite() {
            return Err(SolverError::Rejected {
                command: "integrator",
                message: format!("invalid displacement increment {step}"),
            });
        }
        self.control = Some((node, dof, step));
        self.calls.push(SolverCall::DisplacementControl { node, dof, step });
        Ok(())
    }

    fn set_analysis(&mut self, kind: AnalysisKind) -> SolverResult<()> {
        self.analysis = Some(kind);
        self.calls.push(SolverCall::Analysis(kind));
        Ok(())
    }

    fn analyze_one_step(&mut self, dt: Option<f64>) -> i32 {
        self.analyze_count += 1;
        let step = match dt {
            Some(dt) => dt,
            None => match self.control {
                Some((_, _, step)) => step,
                // Static step with no integrator installed.
                None => {
                    self.calls.push(SolverCall::Analyze {
                        step: 0.0,
                        converged: false,
                    });
                    self.last_norms.clear();
                    return -1;
                }
            },
        };
        let converged = self.converges(step);
        self.calls.push(SolverCall::Analyze { step, converged });

        if converged {
            if dt.is_some() {
                self.time += step;
            } else {
                self.position += step;
            }
            self.last_norms = vec![0.0];
            0
        } else {
            let norm = self.rules.failure_norm.unwrap_or(1.0);
            self.last_norms = vec![10.0 * norm, norm];
            -3
        }
    }

    fn last_test_norms(&mut self) -> Vec<f64> {
        self.last_norms.clone()
    }
}
