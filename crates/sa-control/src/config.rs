//! Control parameters for adaptive analysis.
//!
//! A [`ControlConfig`] starts from documented defaults, is updated with a
//! sparse set of [`ControlOverrides`] (typically loaded from YAML), and is
//! validated once. Run entry points only ever see validated configs.

use std::fmt;
use std::path::Path;

use sa_core::{ensure_finite, ensure_open_interval, ensure_positive};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::algorithm::Algorithm;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::solver::{ConvergenceTest, ConvergenceTestKind};

/// Analysis family driven by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Displacement-controlled static analysis.
    Static,
    /// Time-history analysis with a fixed output interval.
    Transient,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("Static"),
            Self::Transient => f.write_str("Transient"),
        }
    }
}

/// Validated control parameters for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub analysis: AnalysisKind,

    // Convergence test
    pub test_type: ConvergenceTestKind,
    /// Tolerance of the first attempt of every sub-step.
    pub test_tol: f64,
    /// Iteration limit of the first attempt of every sub-step.
    pub test_iter_times: u32,
    pub test_print_flag: i32,
    /// Raise the iteration limit when the last test norm is below `norm_tol`.
    pub try_add_test_times: bool,
    pub norm_tol: f64,
    pub test_iter_times_more: u32,
    /// Loosen the tolerance once the step cannot be bisected any further.
    pub try_loose_test_tol: bool,
    pub loose_test_tol_to: f64,

    // Algorithm fallback
    /// Walk through `algo_types` on failure. When false only the first
    /// entry is used.
    pub try_alter_algo_types: bool,
    pub algo_types: Vec<u32>,

    // Step control
    pub initial_step: f64,
    /// Fraction of the failed step kept for the first half of a bisection.
    pub relaxation: f64,
    pub min_step: f64,

    // Reporting
    /// Successful attempts between periodic progress reports.
    pub print_per: usize,
    pub debug_mode: bool,
}

impl ControlConfig {
    /// Defaults for the given analysis and initial step. Not validated.
    pub fn defaults(analysis: AnalysisKind, initial_step: f64) -> Self {
        Self {
            analysis,
            test_type: ConvergenceTestKind::EnergyIncr,
            test_tol: 1.0e-6,
            test_iter_times: 7,
            test_print_flag: 0,
            try_add_test_times: false,
            norm_tol: 1.0e3,
            test_iter_times_more: 50,
            try_loose_test_tol: false,
            loose_test_tol_to: 1.0,
            try_alter_algo_types: false,
            algo_types: vec![40],
            initial_step,
            relaxation: 0.5,
            min_step: 1.0e-6,
            print_per: 10,
            debug_mode: false,
        }
    }

    /// Defaults updated with `overrides`, then validated.
    pub fn new(
        analysis: AnalysisKind,
        initial_step: f64,
        overrides: &ControlOverrides,
    ) -> AnalyzeResult<Self> {
        let config = overrides.apply(Self::defaults(analysis, initial_step));
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the driver relies on.
    pub fn validate(&self) -> AnalyzeResult<()> {
        ensure_positive(self.test_tol, "test_tol")?;
        ensure_positive(self.norm_tol, "norm_tol")?;
        ensure_positive(self.loose_test_tol_to, "loose_test_tol_to")?;
        ensure_open_interval(self.relaxation, 0.0, 1.0, "relaxation")?;
        ensure_positive(self.min_step, "min_step")?;
        ensure_finite(self.initial_step, "initial_step")?;
        if self.initial_step == 0.0 {
            return Err(AnalyzeError::configuration("initial_step must be nonzero"));
        }
        if self.test_iter_times == 0 {
            return Err(AnalyzeError::configuration(
                "test_iter_times must be at least 1",
            ));
        }
        if self.test_iter_times_more == 0 {
            return Err(AnalyzeError::configuration(
                "test_iter_times_more must be at least 1",
            ));
        }
        if self.print_per == 0 {
            return Err(AnalyzeError::configuration("print_per must be at least 1"));
        }
        if self.algo_types.is_empty() {
            return Err(AnalyzeError::configuration(
                "algo_types must contain at least one algorithm code",
            ));
        }
        for &code in &self.algo_types {
            Algorithm::from_code(code)?;
        }
        Ok(())
    }

    /// Convergence test command for the given attempt parameters.
    pub fn convergence_test(&self, tolerance: f64, max_iterations: u32) -> ConvergenceTest {
        ConvergenceTest {
            kind: self.test_type,
            tolerance,
            max_iterations,
            print_flag: self.test_print_flag,
        }
    }

    /// Convergence test used for the first attempt of every sub-step.
    pub fn base_test(&self) -> ConvergenceTest {
        self.convergence_test(self.test_tol, self.test_iter_times)
    }

    /// Log the effective parameters.
    pub fn log_parameters(&self) {
        info!(
            analysis = %self.analysis,
            test_type = %self.test_type,
            test_tol = self.test_tol,
            test_iter_times = self.test_iter_times,
            test_print_flag = self.test_print_flag,
            "Control parameters"
        );
        info!(
            try_add_test_times = self.try_add_test_times,
            norm_tol = self.norm_tol,
            test_iter_times_more = self.test_iter_times_more,
            try_loose_test_tol = self.try_loose_test_tol,
            loose_test_tol_to = self.loose_test_tol_to,
            try_alter_algo_types = self.try_alter_algo_types,
            algo_types = ?self.algo_types,
            "Escalation parameters"
        );
        info!(
            initial_step = self.initial_step,
            relaxation = self.relaxation,
            min_step = self.min_step,
            print_per = self.print_per,
            debug_mode = self.debug_mode,
            "Step parameters"
        );
    }
}

/// Sparse user overrides applied on top of [`ControlConfig::defaults`].
///
/// Every field is optional; absent fields keep their default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<ConvergenceTestKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_tol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_iter_times: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_print_flag: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub try_add_test_times: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub norm_tol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_iter_times_more: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub try_loose_test_tol: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loose_test_tol_to: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub try_alter_algo_types: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algo_types: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_per: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_mode: Option<bool>,
}

impl ControlOverrides {
    /// Overlay the set fields onto `base`.
    pub fn apply(&self, mut base: ControlConfig) -> ControlConfig {
        if let Some(v) = self.test_type {
            base.test_type = v;
        }
        if let Some(v) = self.test_tol {
            base.test_tol = v;
        }
        if let Some(v) = self.test_iter_times {
            base.test_iter_times = v;
        }
        if let Some(v) = self.test_print_flag {
            base.test_print_flag = v;
        }
        if let Some(v) = self.try_add_test_times {
            base.try_add_test_times = v;
        }
        if let Some(v) = self.norm_tol {
            base.norm_tol = v;
        }
        if let Some(v) = self.test_iter_times_more {
            base.test_iter_times_more = v;
        }
        if let Some(v) = self.try_loose_test_tol {
            base.try_loose_test_tol = v;
        }
        if let Some(v) = self.loose_test_tol_to {
            base.loose_test_tol_to = v;
        }
        if let Some(v) = self.try_alter_algo_types {
            base.try_alter_algo_types = v;
        }
        if let Some(v) = &self.algo_types {
            base.algo_types = v.clone();
        }
        if let Some(v) = self.initial_step {
            base.initial_step = v;
        }
        if let Some(v) = self.relaxation {
            base.relaxation = v;
        }
        if let Some(v) = self.min_step {
            base.min_step = v;
        }
        if let Some(v) = self.print_per {
            base.print_per = v;
        }
        if let Some(v) = self.debug_mode {
            base.debug_mode = v;
        }
        base
    }

    pub fn from_yaml_str(content: &str) -> AnalyzeResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> AnalyzeResult<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Load overrides from a `.json` file, or YAML for any other extension.
pub fn load_overrides(path: &Path) -> AnalyzeResult<ControlOverrides> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => ControlOverrides::from_json_str(&content),
        _ => ControlOverrides::from_yaml_str(&content),
    }
}
