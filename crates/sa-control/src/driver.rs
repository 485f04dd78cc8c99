//! Recursive convergence driver.
//!
//! One call of [`Driver::recursive_analyze`] tries to push the solver
//! through a single sub-step. When the solver fails, the driver escalates
//! in a fixed order:
//!
//! 1. raise the iteration limit, if the last test norm looks recoverable
//! 2. switch to the next algorithm in the fallback list
//! 3. if the step is already at its floor, loosen the test tolerance
//! 4. otherwise bisect the step and run both parts
//!
//! Steps 1 to 3 retry the same piece and can only fire a bounded number of
//! times. Bisection pushes both halves onto a work stack, so deep halving
//! with a `relaxation` close to 1 costs heap, not call stack.

use sa_core::clamp_magnitude_min;
use tracing::{debug, info, trace, warn};

use crate::algorithm::apply_algorithm;
use crate::config::{AnalysisKind, ControlConfig};
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::progress::{ProgressEvent, ProgressStage};
use crate::solver::ExternalSolver;
use crate::state::RunState;

/// Result of driving one sub-step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Converged,
    /// Every escalation was tried and the sub-step still failed.
    Exhausted,
}

impl StepOutcome {
    pub fn is_converged(self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Settings for one pending piece of a sub-step.
#[derive(Clone, Copy, Debug)]
struct Piece {
    step: f64,
    algo_index: usize,
    test_iter_times: u32,
    test_tol: f64,
    /// Escalations and bisections above this piece.
    depth: usize,
}

enum Attempt {
    Converged,
    Exhausted,
    /// Bisected: run `first`, then `rest`.
    Split { first: Piece, rest: Piece },
}

/// Drives an [`ExternalSolver`] through sub-steps for one run.
pub struct Driver<'a, 'p, S: ExternalSolver + ?Sized> {
    solver: &'a mut S,
    config: &'a ControlConfig,
    state: &'a mut RunState,
    progress_cb: Option<&'a mut (dyn FnMut(ProgressEvent) + 'p)>,
}

impl<'a, 'p, S: ExternalSolver + ?Sized> Driver<'a, 'p, S> {
    /// Bind a solver, a validated config and a fresh state.
    ///
    /// `state` must describe what is installed on the solver.
    pub fn new(
        solver: &'a mut S,
        config: &'a ControlConfig,
        state: &'a mut RunState,
        progress_cb: Option<&'a mut (dyn FnMut(ProgressEvent) + 'p)>,
    ) -> AnalyzeResult<Self> {
        config.validate()?;
        if config.analysis == AnalysisKind::Static && state.control.is_none() {
            return Err(AnalyzeError::configuration(
                "static analysis requires a displacement control",
            ));
        }
        Ok(Self {
            solver,
            config,
            state,
            progress_cb,
        })
    }

    pub fn state(&self) -> &RunState {
        self.state
    }

    /// First attempt at `step` with the base algorithm, iteration limit and
    /// tolerance.
    pub fn analyze_step(&mut self, step: f64) -> AnalyzeResult<StepOutcome> {
        self.recursive_analyze(step, 0, self.config.test_iter_times, self.config.test_tol)
    }

    /// Attempt `step` with the given settings, escalating on failure.
    ///
    /// `Err` is reserved for solver command failures and invalid settings;
    /// running out of escalations is `Ok(StepOutcome::Exhausted)`.
    ///
    /// Bisected pieces are kept on an explicit stack, so the number of
    /// bisection levels is not limited by the call stack. Only the bounded
    /// escalations (iterations, algorithm, tolerance) recurse.
    pub fn recursive_analyze(
        &mut self,
        step: f64,
        algo_index: usize,
        test_iter_times: u32,
        test_tol: f64,
    ) -> AnalyzeResult<StepOutcome> {
        let mut pending = vec![Piece {
            step,
            algo_index,
            test_iter_times,
            test_tol,
            depth: 0,
        }];
        while let Some(piece) = pending.pop() {
            match self.attempt(piece)? {
                Attempt::Converged => {}
                Attempt::Exhausted => return Ok(StepOutcome::Exhausted),
                Attempt::Split { first, rest } => {
                    // `first` runs next, `rest` only once `first` is done.
                    pending.push(rest);
                    pending.push(first);
                }
            }
        }
        Ok(StepOutcome::Converged)
    }

    /// One solver call for `piece`, followed by the escalation ladder.
    fn attempt(&mut self, piece: Piece) -> AnalyzeResult<Attempt> {
        let config = self.config;
        let Piece {
            step,
            algo_index,
            test_iter_times,
            test_tol,
            depth,
        } = piece;
        self.state.stats.max_depth = self.state.stats.max_depth.max(depth);
        if config.debug_mode {
            debug!(step, algo_index, test_iter_times, test_tol, depth, "Run recursive");
        }
        trace!(state = ?self.state, "Recursive analyze entry");

        self.install_algorithm(algo_index)?;
        self.install_test(test_iter_times, test_tol)?;
        self.install_step(step)?;

        let status = match config.analysis {
            AnalysisKind::Static => self.solver.analyze_one_step(None),
            AnalysisKind::Transient => self.solver.analyze_one_step(Some(step)),
        };
        self.state.stats.solver_calls += 1;

        if status == 0 {
            self.state.counter += 1;
            if self.state.counter >= config.print_per {
                info!(
                    "Progress {:.2}%, elapsed {:.3} s",
                    100.0 * self.state.fraction_complete(),
                    self.state.elapsed_s()
                );
                self.emit(ProgressStage::Periodic, None);
                self.state.counter = 0;
            }
            return Ok(Attempt::Converged);
        }
        self.state.stats.failed_attempts += 1;
        debug!(status, step, algo_index, test_iter_times, test_tol, "Step did not converge");

        if config.try_add_test_times && test_iter_times != config.test_iter_times_more {
            match self.solver.last_test_norms().last().copied() {
                Some(norm) if norm < config.norm_tol => {
                    info!(
                        norm,
                        "Adding test iteration times to {}", config.test_iter_times_more
                    );
                    self.state.stats.test_iteration_increases += 1;
                    return self.attempt(Piece {
                        test_iter_times: config.test_iter_times_more,
                        depth: depth + 1,
                        ..piece
                    });
                }
                norm => info!(?norm, "Not adding test iteration times"),
            }
        }

        if config.try_alter_algo_types && algo_index + 1 < config.algo_types.len() {
            info!(
                "Trying next algorithm {}",
                config.algo_types[algo_index + 1]
            );
            self.state.stats.algorithm_switches += 1;
            return self.attempt(Piece {
                algo_index: algo_index + 1,
                depth: depth + 1,
                ..piece
            });
        }

        if step.abs() < 2.0 * config.min_step {
            warn!(step, "Current step is too small to divide");
            if config.try_loose_test_tol && test_tol != config.loose_test_tol_to {
                warn!("Loosening test tolerance to {}", config.loose_test_tol_to);
                self.state.stats.tolerance_loosenings += 1;
                return self.attempt(Piece {
                    step,
                    algo_index: 0,
                    test_iter_times: config.test_iter_times,
                    test_tol: config.loose_test_tol_to,
                    depth: depth + 1,
                });
            }
            return Ok(Attempt::Exhausted);
        }

        let step_new = clamp_magnitude_min(step * config.relaxation, config.min_step);
        let step_rest = step - step_new;
        info!(
            "Dividing the current step {} into {} and {}",
            step, step_new, step_rest
        );
        self.state.stats.bisections += 1;
        let half = |step: f64| Piece {
            step,
            algo_index: 0,
            test_iter_times,
            test_tol,
            depth: depth + 1,
        };
        Ok(Attempt::Split {
            first: half(step_new),
            rest: half(step_rest),
        })
    }

    fn install_algorithm(&mut self, algo_index: usize) -> AnalyzeResult<()> {
        if algo_index == self.state.algo_index {
            return Ok(());
        }
        let code = *self.config.algo_types.get(algo_index).ok_or_else(|| {
            AnalyzeError::configuration(format!(
                "algorithm index {algo_index} outside the configured list"
            ))
        })?;
        apply_algorithm(&mut *self.solver, code)?;
        self.state.algo_index = algo_index;
        Ok(())
    }

    fn install_test(&mut self, test_iter_times: u32, test_tol: f64) -> AnalyzeResult<()> {
        if test_iter_times == self.state.test_iter_times && test_tol == self.state.test_tol {
            return Ok(());
        }
        if test_iter_times != self.state.test_iter_times {
            info!("Setting test iteration times to {test_iter_times}");
        }
        if test_tol != self.state.test_tol {
            info!("Setting test tolerance to {test_tol}");
        }
        self.solver
            .set_convergence_test(&self.config.convergence_test(test_tol, test_iter_times))?;
        self.state.test_iter_times = test_iter_times;
        self.state.test_tol = test_tol;
        Ok(())
    }

    fn install_step(&mut self, step: f64) -> AnalyzeResult<()> {
        if self.config.analysis != AnalysisKind::Static {
            return Ok(());
        }
        let Some(control) = self.state.control.as_mut() else {
            return Ok(());
        };
        if control.step == step {
            return Ok(());
        }
        info!("Setting step to {step}");
        self.solver
            .set_displacement_control(control.node, control.dof, step)?;
        control.step = step;
        Ok(())
    }

    /// Record a completed top-level sub-step.
    pub(crate) fn complete_segment(&mut self) {
        self.state.progress += 1;
        if self.config.debug_mode {
            debug!(
                "Progress {:.4} ({} of {})",
                self.state.fraction_complete(),
                self.state.progress,
                self.state.segments
            );
            self.emit(ProgressStage::SegmentCompleted, None);
        }
    }

    pub(crate) fn emit(&mut self, stage: ProgressStage, message: Option<String>) {
        if let Some(cb) = self.progress_cb.as_deref_mut() {
            cb(ProgressEvent {
                analysis: self.config.analysis,
                stage,
                completed: self.state.progress,
                total: self.state.segments,
                fraction_complete: self.state.fraction_complete(),
                elapsed_wall_s: self.state.elapsed_s(),
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlOverrides;
    use crate::scripted::{ConvergenceRules, ScriptedSolver, SolverCall};
    use crate::state::DisplacementControl;

    fn transient_config(overrides: ControlOverrides) -> ControlConfig {
        ControlConfig::new(AnalysisKind::Transient, 0.01, &overrides).unwrap()
    }

    #[test]
    fn converged_step_needs_no_reconfiguration() {
        let config = transient_config(ControlOverrides::default());
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::converging();
        let mut driver = Driver::new(&mut solver, &config, &mut state, None).unwrap();

        let outcome = driver.analyze_step(0.01).unwrap();
        let outcome_again = driver.analyze_step(0.01).unwrap();

        assert_eq!(outcome, StepOutcome::Converged);
        assert_eq!(outcome_again, StepOutcome::Converged);
        assert_eq!(solver.analyze_count(), 2);
        assert_eq!(solver.algorithm_changes(), 0);
        assert_eq!(solver.test_changes(), 0);
    }

    #[test]
    fn bisects_until_step_fits() {
        let config = transient_config(ControlOverrides::default());
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::new(ConvergenceRules {
            max_step: Some(0.003),
            ..Default::default()
        });
        let outcome = Driver::new(&mut solver, &config, &mut state, None)
            .unwrap()
            .analyze_step(0.01)
            .unwrap();

        assert!(outcome.is_converged());
        assert!((solver.time() - 0.01).abs() < 1e-12);
        assert!(state.stats.bisections >= 2);
        assert_eq!(state.stats.solver_calls, solver.analyze_count());
    }

    #[test]
    fn algorithm_index_resets_after_bisection() {
        let overrides = ControlOverrides {
            try_alter_algo_types: Some(true),
            algo_types: Some(vec![40, 10]),
            ..Default::default()
        };
        let config = transient_config(overrides);
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::new(ConvergenceRules {
            max_step: Some(0.006),
            ..Default::default()
        });
        let outcome = Driver::new(&mut solver, &config, &mut state, None)
            .unwrap()
            .analyze_step(0.01)
            .unwrap();

        assert!(outcome.is_converged());
        // 0.01 fails under 40 and 10, then both halves run under 40 again.
        assert_eq!(solver.attempted_steps(), vec![0.01, 0.01, 0.005, 0.005]);
        assert_eq!(solver.algorithm().map(|a| a.code()), Some(40));
        assert_eq!(state.algo_index, 0);
    }

    #[test]
    fn iteration_escalation_needs_small_norm() {
        let overrides = ControlOverrides {
            try_add_test_times: Some(true),
            ..Default::default()
        };
        let config = transient_config(overrides);

        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::new(ConvergenceRules {
            min_iterations: Some(20),
            ..Default::default()
        });
        let outcome = Driver::new(&mut solver, &config, &mut state, None)
            .unwrap()
            .analyze_step(0.01)
            .unwrap();
        assert!(outcome.is_converged());
        assert_eq!(solver.analyze_count(), 2);
        assert_eq!(solver.test().map(|t| t.max_iterations), Some(50));
        assert_eq!(state.stats.test_iteration_increases, 1);
        assert_eq!(state.stats.bisections, 0);

        // Same solver, but the norm is above norm_tol: no escalation, bisect instead.
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::new(ConvergenceRules {
            min_iterations: Some(20),
            failure_norm: Some(1e6),
            ..Default::default()
        });
        let outcome = Driver::new(&mut solver, &config, &mut state, None)
            .unwrap()
            .analyze_step(0.01)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Exhausted);
        assert_eq!(state.stats.test_iteration_increases, 0);
        assert!(state.stats.bisections > 0);
    }

    #[test]
    fn tolerance_is_loosened_at_min_step() {
        let overrides = ControlOverrides {
            try_loose_test_tol: Some(true),
            loose_test_tol_to: Some(1e-2),
            min_step: Some(1e-3),
            ..Default::default()
        };
        let config = transient_config(overrides);
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::new(ConvergenceRules {
            min_tolerance: Some(1e-3),
            min_iterations: Some(1),
            ..Default::default()
        });
        let outcome = Driver::new(&mut solver, &config, &mut state, None)
            .unwrap()
            .analyze_step(0.01)
            .unwrap();

        assert!(outcome.is_converged());
        assert!(state.stats.tolerance_loosenings >= 1);
        assert_eq!(solver.test().map(|t| t.tolerance), Some(1e-2));
    }

    #[test]
    fn static_step_is_reinstalled_only_when_changed() {
        let config =
            ControlConfig::new(AnalysisKind::Static, 0.5, &ControlOverrides::default()).unwrap();
        let mut state = RunState::new(&config, 3).with_displacement_control(DisplacementControl {
            node: 2,
            dof: 1,
            step: 0.5,
        });
        let mut solver = ScriptedSolver::converging();
        solver.set_displacement_control(2, 1, 0.5).unwrap();
        let mut driver = Driver::new(&mut solver, &config, &mut state, None).unwrap();
        driver.analyze_step(0.5).unwrap();
        driver.analyze_step(0.5).unwrap();
        driver.analyze_step(0.25).unwrap();

        // Setup plus the switch to 0.25.
        assert_eq!(solver.control_changes(), 2);
        assert!((solver.position() - 1.25).abs() < 1e-12);
        assert_eq!(state.control.map(|c| c.step), Some(0.25));
    }

    #[test]
    fn static_driver_requires_displacement_control() {
        let config =
            ControlConfig::new(AnalysisKind::Static, 0.5, &ControlOverrides::default()).unwrap();
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::converging();
        assert!(Driver::new(&mut solver, &config, &mut state, None).is_err());
    }

    #[test]
    fn periodic_progress_every_print_per_successes() {
        let overrides = ControlOverrides {
            print_per: Some(2),
            ..Default::default()
        };
        let config = transient_config(overrides);
        let mut state = RunState::new(&config, 5);
        let mut solver = ScriptedSolver::converging();
        let mut events = Vec::new();
        let mut cb = |event: ProgressEvent| events.push(event);
        let mut driver = Driver::new(&mut solver, &config, &mut state, Some(&mut cb)).unwrap();
        for _ in 0..5 {
            driver.analyze_step(0.01).unwrap();
        }
        drop(driver);

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.stage == ProgressStage::Periodic));
        assert_eq!(state.counter, 1);
    }

    #[test]
    fn split_pieces_run_innermost_first() {
        let overrides = ControlOverrides {
            relaxation: Some(0.9),
            ..Default::default()
        };
        let config = ControlConfig::new(AnalysisKind::Transient, 1.0, &overrides).unwrap();
        let mut state = RunState::new(&config, 1);
        let mut solver = ScriptedSolver::new(ConvergenceRules {
            max_step: Some(0.5),
            ..Default::default()
        });
        let outcome = Driver::new(&mut solver, &config, &mut state, None)
            .unwrap()
            .analyze_step(1.0)
            .unwrap();

        assert!(outcome.is_converged());
        assert!((solver.time() - 1.0).abs() < 1e-12);
        let converged: Vec<f64> = solver
            .calls()
            .iter()
            .filter_map(|c| match c {
                SolverCall::Analyze {
                    step,
                    converged: true,
                } => Some(*step),
                _ => None,
            })
            .collect();
        // 0.9^7 first, then the rests of the enclosing splits, outermost last.
        assert_eq!(converged.len(), 8);
        assert!((converged[0] - 0.9_f64.powi(7)).abs() < 1e-12);
        assert!(converged[1..].windows(2).all(|w| w[0] < w[1]));
        assert!((converged[7] - 0.1).abs() < 1e-12);
        assert_eq!(state.stats.bisections, 7);
        assert_eq!(state.stats.max_depth, 7);
    }
}
