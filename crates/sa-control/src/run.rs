//! Run entry points: transient and displacement-controlled static analysis.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::algorithm::apply_algorithm;
use crate::config::{AnalysisKind, ControlConfig, ControlOverrides};
use crate::driver::Driver;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::plan::StepPlan;
use crate::progress::{ProgressEvent, ProgressStage};
use crate::solver::ExternalSolver;
use crate::state::{DisplacementControl, RunState, RunStats};

/// Outcome of a successful run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub analysis: AnalysisKind,
    pub segments: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_s: f64,
    pub stats: RunStats,
    /// Algorithm code installed when the run ended.
    pub final_algorithm: u32,
    pub final_test_tol: f64,
    pub final_test_iter_times: u32,
}

impl RunSummary {
    fn from_state(config: &ControlConfig, state: &RunState) -> Self {
        Self {
            analysis: config.analysis,
            segments: state.segments,
            started_at: state.started_at,
            finished_at: Utc::now(),
            elapsed_s: state.elapsed_s(),
            stats: state.stats.clone(),
            final_algorithm: config.algo_types[state.algo_index],
            final_test_tol: state.test_tol,
            final_test_iter_times: state.test_iter_times,
        }
    }
}

/// Signed status of a finished run: 0 on success, negative on failure.
pub fn exit_status(result: &AnalyzeResult<RunSummary>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

/// Run `point_count` transient steps of `dt`.
///
/// The simulated duration is `point_count * dt` unless `initial_step` is
/// overridden; the caller owns any end-time check.
pub fn run_transient<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    dt: f64,
    point_count: usize,
    overrides: &ControlOverrides,
) -> AnalyzeResult<RunSummary> {
    run_transient_with_progress(solver, dt, point_count, overrides, None)
}

/// [`run_transient`] streaming progress events.
pub fn run_transient_with_progress<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    dt: f64,
    point_count: usize,
    overrides: &ControlOverrides,
    progress_cb: Option<&mut dyn FnMut(ProgressEvent)>,
) -> AnalyzeResult<RunSummary> {
    let config = ControlConfig::new(AnalysisKind::Transient, dt, overrides)?;
    let plan = StepPlan::transient(config.initial_step, point_count)?;
    execute(solver, &config, &plan, None, progress_cb)
}

/// Run a displacement-controlled static analysis of `dof` at `node`
/// through `targets`, with sub-steps no longer than `max_step`.
pub fn run_static<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    node: usize,
    dof: usize,
    max_step: f64,
    targets: &[f64],
    overrides: &ControlOverrides,
) -> AnalyzeResult<RunSummary> {
    run_static_with_progress(solver, node, dof, max_step, targets, overrides, None)
}

/// [`run_static`] streaming progress events.
pub fn run_static_with_progress<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    node: usize,
    dof: usize,
    max_step: f64,
    targets: &[f64],
    overrides: &ControlOverrides,
    progress_cb: Option<&mut dyn FnMut(ProgressEvent)>,
) -> AnalyzeResult<RunSummary> {
    let plan = StepPlan::displacement(max_step, targets)?;
    let Some(&first_step) = plan.steps().first() else {
        return Err(AnalyzeError::configuration(
            "targets describe no displacement",
        ));
    };
    let config = ControlConfig::new(AnalysisKind::Static, first_step, overrides)?;
    let control = DisplacementControl {
        node,
        dof,
        step: config.initial_step,
    };
    execute(solver, &config, &plan, Some(control), progress_cb)
}

/// Install the base settings on a fresh solver.
fn initialize_solver<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    config: &ControlConfig,
    control: Option<DisplacementControl>,
) -> AnalyzeResult<()> {
    solver.set_convergence_test(&config.base_test())?;
    apply_algorithm(solver, config.algo_types[0])?;
    if let Some(control) = control {
        solver.set_displacement_control(control.node, control.dof, control.step)?;
    }
    solver.set_analysis(config.analysis)?;
    Ok(())
}

fn execute<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    config: &ControlConfig,
    plan: &StepPlan,
    control: Option<DisplacementControl>,
    progress_cb: Option<&mut dyn FnMut(ProgressEvent)>,
) -> AnalyzeResult<RunSummary> {
    config.log_parameters();
    info!(segments = plan.len(), "Starting {} analysis", config.analysis);
    initialize_solver(solver, config, control)?;

    let mut state = RunState::new(config, plan.len());
    if let Some(control) = control {
        state = state.with_displacement_control(control);
    }

    let mut driver = Driver::new(solver, config, &mut state, progress_cb)?;
    driver.emit(ProgressStage::Started, None);

    for (index, &step) in plan.steps().iter().enumerate() {
        let outcome = driver.analyze_step(step)?;
        if !outcome.is_converged() {
            let elapsed_s = driver.state().elapsed_s();
            error!(
                segment = index + 1,
                step, "Analysis failed. Time consumption: {elapsed_s:.3} s"
            );
            driver.emit(
                ProgressStage::Failed,
                Some(format!("sub-step {} could not be completed", index + 1)),
            );
            return Err(AnalyzeError::ConvergenceExhausted {
                step,
                segment: index + 1,
                segments: plan.len(),
                elapsed_s,
            });
        }
        driver.complete_segment();
    }

    info!(
        "Successfully finished! Time consumption: {:.3} s",
        driver.state().elapsed_s()
    );
    driver.emit(ProgressStage::Finished, None);
    debug!(stats = ?driver.state().stats, "Run statistics");

    Ok(RunSummary::from_state(config, &state))
}
