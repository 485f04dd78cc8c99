//! Error types for adaptive analysis control.

use sa_core::CoreError;
use thiserror::Error;

/// Errors reported by the external solver's command interface.
///
/// Non-convergence is not one of these: a nonzero analyze status is a
/// normal outcome that drives escalation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Solver rejected command `{command}`: {message}")]
    Rejected {
        command: &'static str,
        message: String,
    },

    #[error("Backend error: {message}")]
    Backend { message: String },
}

pub type SolverResult<T> = Result<T, SolverError>;

/// Errors encountered while planning or running an adaptive analysis.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Configuration error: {what}")]
    Configuration { what: String },

    #[error("Unknown algorithm code: {code}")]
    UnknownAlgorithm { code: u32 },

    #[error(
        "Convergence exhausted on sub-step {segment} of {segments} (step {step}) after {elapsed_s:.3} s"
    )]
    ConvergenceExhausted {
        /// The top-level sub-step that could not be completed.
        step: f64,
        /// 1-based position of that sub-step in the plan.
        segment: usize,
        segments: usize,
        elapsed_s: f64,
    },

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AnalyzeResult<T> = Result<T, AnalyzeError>;

impl From<CoreError> for AnalyzeError {
    fn from(e: CoreError) -> Self {
        AnalyzeError::Configuration {
            what: e.to_string(),
        }
    }
}

impl AnalyzeError {
    pub fn configuration(what: impl Into<String>) -> Self {
        Self::Configuration { what: what.into() }
    }

    /// True for errors raised before any solver interaction.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnknownAlgorithm { .. }
                | Self::Io(_)
                | Self::Yaml(_)
                | Self::Json(_)
        )
    }

    /// Signed status reported to callers: -1 exhausted, -2 configuration, -3 solver.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::ConvergenceExhausted { .. } => -1,
            Self::Solver(_) => -3,
            _ => -2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_negative_and_distinct() {
        let exhausted = AnalyzeError::ConvergenceExhausted {
            step: 0.1,
            segment: 3,
            segments: 10,
            elapsed_s: 0.0,
        };
        let config = AnalyzeError::UnknownAlgorithm { code: 99 };
        let solver = AnalyzeError::from(SolverError::Backend {
            message: "lost connection".to_string(),
        });
        assert_eq!(exhausted.status_code(), -1);
        assert_eq!(config.status_code(), -2);
        assert_eq!(solver.status_code(), -3);
        assert!(config.is_configuration());
        assert!(!exhausted.is_configuration());
    }

    #[test]
    fn core_errors_become_configuration_errors() {
        let err: AnalyzeError = CoreError::NonPositive {
            what: "min_step",
            value: 0.0,
        }
        .into();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("min_step"));
    }
}
