//! Transient runs against a hand-written solver.

use sa_control::{
    Algorithm, AnalysisKind, AnalyzeError, ControlOverrides, ConvergenceTest, ExternalSolver,
    SolverError, SolverResult, exit_status, run_transient,
};

/// Fails a fixed number of analyze calls, then converges.
struct FailOnceSolver {
    failures_left: usize,
    steps: Vec<f64>,
    time: f64,
}

impl FailOnceSolver {
    fn new(failures: usize) -> Self {
        Self {
            failures_left: failures,
            steps: Vec::new(),
            time: 0.0,
        }
    }
}

impl ExternalSolver for FailOnceSolver {
    fn set_convergence_test(&mut self, _test: &ConvergenceTest) -> SolverResult<()> {
        Ok(())
    }

    fn set_algorithm(&mut self, _algorithm: &Algorithm) -> SolverResult<()> {
        Ok(())
    }

    fn set_displacement_control(
        &mut self,
        _node: usize,
        _dof: usize,
        _step: f64,
    ) -> SolverResult<()> {
        Err(SolverError::Rejected {
            command: "integrator",
            message: "transient model".to_string(),
        })
    }

    fn set_analysis(&mut self, kind: AnalysisKind) -> SolverResult<()> {
        assert_eq!(kind, AnalysisKind::Transient);
        Ok(())
    }

    fn analyze_one_step(&mut self, dt: Option<f64>) -> i32 {
        let dt = dt.expect("transient steps carry dt");
        self.steps.push(dt);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return -3;
        }
        self.time += dt;
        0
    }

    fn last_test_norms(&mut self) -> Vec<f64> {
        Vec::new()
    }
}

/// Rejects every command.
struct OfflineSolver;

impl ExternalSolver for OfflineSolver {
    fn set_convergence_test(&mut self, _test: &ConvergenceTest) -> SolverResult<()> {
        Err(SolverError::Backend {
            message: "interpreter not running".to_string(),
        })
    }

    fn set_algorithm(&mut self, _algorithm: &Algorithm) -> SolverResult<()> {
        unreachable!("first command already failed")
    }

    fn set_displacement_control(
        &mut self,
        _node: usize,
        _dof: usize,
        _step: f64,
    ) -> SolverResult<()> {
        unreachable!("first command already failed")
    }

    fn set_analysis(&mut self, _kind: AnalysisKind) -> SolverResult<()> {
        unreachable!("first command already failed")
    }

    fn analyze_one_step(&mut self, _dt: Option<f64>) -> i32 {
        unreachable!("first command already failed")
    }

    fn last_test_norms(&mut self) -> Vec<f64> {
        Vec::new()
    }
}

#[test]
fn transient_cutback_retries_step() {
    let mut solver = FailOnceSolver::new(1);

    let summary = run_transient(&mut solver, 0.1, 2, &ControlOverrides::default())
        .expect("bisection should recover");

    assert_eq!(solver.failures_left, 0, "failure should have been consumed");
    assert_eq!(solver.steps, vec![0.1, 0.05, 0.05, 0.1]);
    assert!((solver.time - 0.2).abs() < 1e-12);
    assert_eq!(summary.segments, 2);
    assert_eq!(summary.stats.bisections, 1);
    assert_eq!(summary.stats.failed_attempts, 1);
    assert_eq!(summary.stats.max_depth, 1);
}

#[test]
fn empty_norms_do_not_raise_iterations() {
    let mut solver = FailOnceSolver::new(1);
    let overrides = ControlOverrides {
        try_add_test_times: Some(true),
        ..Default::default()
    };

    let summary = run_transient(&mut solver, 0.1, 1, &overrides).unwrap();

    assert_eq!(summary.stats.test_iteration_increases, 0);
    assert_eq!(summary.stats.bisections, 1);
    assert_eq!(summary.final_test_iter_times, 7);
}

#[test]
fn zero_points_is_an_empty_success() {
    let mut solver = FailOnceSolver::new(0);
    let summary = run_transient(&mut solver, 0.1, 0, &ControlOverrides::default()).unwrap();
    assert_eq!(summary.segments, 0);
    assert!(solver.steps.is_empty());
}

#[test]
fn solver_failure_maps_to_solver_status() {
    let result = run_transient(&mut OfflineSolver, 0.1, 5, &ControlOverrides::default());
    assert_eq!(exit_status(&result), -3);
    match result {
        Err(AnalyzeError::Solver(SolverError::Backend { message })) => {
            assert!(message.contains("interpreter"));
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[test]
fn summary_serializes_to_json() {
    let mut solver = FailOnceSolver::new(0);
    let summary = run_transient(&mut solver, 0.5, 3, &ControlOverrides::default()).unwrap();
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["analysis"], "transient");
    assert_eq!(json["segments"], 3);
    assert_eq!(json["final_algorithm"], 40);
    assert_eq!(json["stats"]["solver_calls"], 3);
}
