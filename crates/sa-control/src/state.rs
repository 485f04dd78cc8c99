//! Mutable bookkeeping of a single adaptive run.

use chrono::{DateTime, Utc};
use sa_core::Stopwatch;
use serde::Serialize;

use crate::config::ControlConfig;

/// Displacement-control target of a static analysis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DisplacementControl {
    pub node: usize,
    pub dof: usize,
    /// Step currently installed on the solver.
    pub step: f64,
}

/// Counters accumulated while driving the solver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub solver_calls: usize,
    pub failed_attempts: usize,
    pub bisections: usize,
    pub algorithm_switches: usize,
    pub test_iteration_increases: usize,
    pub tolerance_loosenings: usize,
    /// Deepest recursion level reached (0 = first attempt of a sub-step).
    pub max_depth: usize,
}

/// State threaded through the recursive driver.
///
/// Mirrors what is currently installed on the solver so that unchanged
/// settings are never re-sent. One state per run.
#[derive(Clone, Debug)]
pub struct RunState {
    /// Index into `ControlConfig::algo_types` of the installed algorithm.
    pub algo_index: usize,
    pub test_iter_times: u32,
    pub test_tol: f64,
    /// Converged attempts since the last periodic report.
    pub counter: usize,
    /// Completed top-level sub-steps.
    pub progress: usize,
    /// Planned top-level sub-steps.
    pub segments: usize,
    pub started_at: DateTime<Utc>,
    pub control: Option<DisplacementControl>,
    pub stats: RunStats,
    clock: Stopwatch,
}

impl RunState {
    /// Fresh state matching a solver initialised with `config`'s base settings.
    pub fn new(config: &ControlConfig, segments: usize) -> Self {
        Self {
            algo_index: 0,
            test_iter_times: config.test_iter_times,
            test_tol: config.test_tol,
            counter: 0,
            progress: 0,
            segments,
            started_at: Utc::now(),
            control: None,
            stats: RunStats::default(),
            clock: Stopwatch::start(),
        }
    }

    pub fn with_displacement_control(mut self, control: DisplacementControl) -> Self {
        self.control = Some(control);
        self
    }

    /// Completed share of the plan in `[0, 1]`.
    pub fn fraction_complete(&self) -> f64 {
        if self.segments == 0 {
            1.0
        } else {
            self.progress as f64 / self.segments as f64
        }
    }

    pub fn elapsed_s(&self) -> f64 {
        self.clock.elapsed_s()
    }
}
