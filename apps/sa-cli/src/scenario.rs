//! Replay scenarios: an analysis request, control overrides and the rules
//! of a scripted solver, read from one YAML file.

use std::path::Path;

use sa_control::{
    AnalyzeResult, ControlOverrides, ConvergenceRules, ProgressEvent, RunSummary, ScriptedSolver,
    run_static_with_progress, run_transient_with_progress,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioAnalysis {
    Static {
        node: usize,
        dof: usize,
        max_step: f64,
        targets: Vec<f64>,
    },
    Transient {
        dt: f64,
        points: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub analysis: ScenarioAnalysis,
    #[serde(default)]
    pub overrides: ControlOverrides,
    #[serde(default)]
    pub solver: ConvergenceRules,
}

impl Scenario {
    pub fn from_yaml_str(content: &str) -> AnalyzeResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> AnalyzeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Run the analysis against a fresh scripted solver.
    pub fn replay(
        &self,
        progress_cb: Option<&mut dyn FnMut(ProgressEvent)>,
    ) -> (ScriptedSolver, AnalyzeResult<RunSummary>) {
        let mut solver = ScriptedSolver::new(self.solver.clone());
        let result = match &self.analysis {
            ScenarioAnalysis::Static {
                node,
                dof,
                max_step,
                targets,
            } => run_static_with_progress(
                &mut solver,
                *node,
                *dof,
                *max_step,
                targets,
                &self.overrides,
                progress_cb,
            ),
            ScenarioAnalysis::Transient { dt, points } => run_transient_with_progress(
                &mut solver,
                *dt,
                *points,
                &self.overrides,
                progress_cb,
            ),
        };
        (solver, result)
    }
}
