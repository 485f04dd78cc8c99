//! Adaptive convergence control for incremental nonlinear analysis.
//!
//! Drives an external solver through a planned sequence of sub-steps and
//! recovers from non-convergence by escalating solver settings and
//! subdividing steps.
//!
//! Provides:
//! - Algorithm selection from compact integer codes
//! - Validated control parameters with sparse YAML/JSON overrides
//! - Step planning for transient and displacement-controlled static runs
//! - The recursive escalation driver and its run state
//! - A rule-driven scripted solver for rehearsal and testing

pub mod algorithm;
pub mod config;
pub mod driver;
pub mod error;
pub mod plan;
pub mod progress;
pub mod run;
pub mod scripted;
pub mod solver;
pub mod state;

// Re-exports for public API
pub use algorithm::{ALGORITHM_CODES, Algorithm, LineSearch, apply_algorithm};
pub use config::{AnalysisKind, ControlConfig, ControlOverrides, load_overrides};
pub use driver::{Driver, StepOutcome};
pub use error::{AnalyzeError, AnalyzeResult, SolverError, SolverResult};
pub use plan::StepPlan;
pub use progress::{ProgressEvent, ProgressStage};
pub use run::{
    RunSummary, exit_status, run_static, run_static_with_progress, run_transient,
    run_transient_with_progress,
};
pub use scripted::{ConvergenceRules, ScriptedSolver, SolverCall};
pub use solver::{ConvergenceTest, ConvergenceTestKind, ExternalSolver};
pub use state::{DisplacementControl, RunState, RunStats};
