//! Nonlinear iteration algorithm selection.
//!
//! Algorithms are addressed by integer codes so that fallback lists can be
//! written compactly in configuration files (`algo_types: [40, 10, 20]`).
//! The tens digit picks the family, the units digit picks a variant.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AnalyzeError, AnalyzeResult};
use crate::solver::ExternalSolver;

/// Subspace dimension used by the bounded Krylov-Newton variants.
pub const KRYLOV_MAX_DIM: u32 = 50;

/// Every code accepted by [`Algorithm::from_code`].
pub const ALGORITHM_CODES: [u32; 28] = [
    0, 1, 2, 10, 11, 12, 20, 21, 22, 23, 30, 31, 40, 41, 42, 43, 44, 45, 50, 51, 52, 53, 60, 70,
    80, 90, 91, 92,
];

/// Line search flavour for Newton with line search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSearch {
    Bisection,
    Secant,
    RegulaFalsi,
}

/// Concrete nonlinear iteration strategy handed to the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Linear {
        initial: bool,
        factor_once: bool,
    },
    Newton {
        initial: bool,
        initial_then_current: bool,
    },
    /// `search: None` leaves the solver's default line search in place.
    NewtonLineSearch {
        search: Option<LineSearch>,
    },
    ModifiedNewton {
        initial: bool,
    },
    KrylovNewton {
        iterate_initial: bool,
        increment_initial: bool,
        max_dim: Option<u32>,
    },
    SecantNewton {
        iterate_initial: bool,
        increment_initial: bool,
    },
    Bfgs,
    Broyden,
    PeriodicNewton,
    /// User-supplied algorithm registered with the solver under `slot`.
    User {
        slot: u8,
    },
}

impl Algorithm {
    /// Resolve an algorithm code.
    pub fn from_code(code: u32) -> AnalyzeResult<Self> {
        let algorithm = match code {
            0 => Self::Linear {
                initial: false,
                factor_once: false,
            },
            1 => Self::Linear {
                initial: true,
                factor_once: false,
            },
            2 => Self::Linear {
                initial: false,
                factor_once: true,
            },
            10 => Self::Newton {
                initial: false,
                initial_then_current: false,
            },
            11 => Self::Newton {
                initial: true,
                initial_then_current: false,
            },
            12 => Self::Newton {
                initial: false,
                initial_then_current: true,
            },
            20 => Self::NewtonLineSearch { search: None },
            21 => Self::NewtonLineSearch {
                search: Some(LineSearch::Bisection),
            },
            22 => Self::NewtonLineSearch {
                search: Some(LineSearch::Secant),
            },
            23 => Self::NewtonLineSearch {
                search: Some(LineSearch::RegulaFalsi),
            },
            30 => Self::ModifiedNewton { initial: false },
            31 => Self::ModifiedNewton { initial: true },
            40..=45 => Self::KrylovNewton {
                iterate_initial: matches!(code, 41 | 43 | 45),
                increment_initial: matches!(code, 42 | 43 | 45),
                max_dim: matches!(code, 44 | 45).then_some(KRYLOV_MAX_DIM),
            },
            50..=53 => Self::SecantNewton {
                iterate_initial: matches!(code, 51 | 53),
                increment_initial: matches!(code, 52 | 53),
            },
            60 => Self::Bfgs,
            70 => Self::Broyden,
            80 => Self::PeriodicNewton,
            90..=92 => Self::User {
                slot: (code - 90) as u8,
            },
            _ => return Err(AnalyzeError::UnknownAlgorithm { code }),
        };
        Ok(algorithm)
    }

    /// The code that selects this algorithm.
    pub fn code(&self) -> u32 {
        match *self {
            Self::Linear {
                initial,
                factor_once,
            } => {
                if factor_once {
                    2
                } else if initial {
                    1
                } else {
                    0
                }
            }
            Self::Newton {
                initial,
                initial_then_current,
            } => {
                if initial_then_current {
                    12
                } else if initial {
                    11
                } else {
                    10
                }
            }
            Self::NewtonLineSearch { search } => match search {
                None => 20,
                Some(LineSearch::Bisection) => 21,
                Some(LineSearch::Secant) => 22,
                Some(LineSearch::RegulaFalsi) => 23,
            },
            Self::ModifiedNewton { initial } => 30 + u32::from(initial),
            Self::KrylovNewton {
                iterate_initial,
                increment_initial,
                max_dim,
            } => match (iterate_initial, increment_initial, max_dim.is_some()) {
                (false, false, false) => 40,
                (true, false, false) => 41,
                (false, true, false) => 42,
                (true, true, false) => 43,
                (true, true, true) => 45,
                (_, _, true) => 44,
            },
            Self::SecantNewton {
                iterate_initial,
                increment_initial,
            } => 50 + u32::from(iterate_initial) + 2 * u32::from(increment_initial),
            Self::Bfgs => 60,
            Self::Broyden => 70,
            Self::PeriodicNewton => 80,
            Self::User { slot } => 90 + u32::from(slot),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Linear {
                initial,
                factor_once,
            } => {
                f.write_str("Linear")?;
                if initial {
                    f.write_str(" -initial")?;
                }
                if factor_once {
                    f.write_str(" -factorOnce")?;
                }
                Ok(())
            }
            Self::Newton {
                initial,
                initial_then_current,
            } => {
                f.write_str("Newton")?;
                if initial {
                    f.write_str(" -initial")?;
                }
                if initial_then_current {
                    f.write_str(" -initialThenCurrent")?;
                }
                Ok(())
            }
            Self::NewtonLineSearch { search } => match search {
                None => f.write_str("NewtonLineSearch"),
                Some(kind) => write!(f, "NewtonLineSearch -type {kind:?}"),
            },
            Self::ModifiedNewton { initial } => {
                f.write_str("ModifiedNewton")?;
                if initial {
                    f.write_str(" -initial")?;
                }
                Ok(())
            }
            Self::KrylovNewton {
                iterate_initial,
                increment_initial,
                max_dim,
            } => {
                f.write_str("KrylovNewton")?;
                if iterate_initial {
                    f.write_str(" -iterate initial")?;
                }
                if increment_initial {
                    f.write_str(" -increment initial")?;
                }
                if let Some(dim) = max_dim {
                    write!(f, " -maxDim {dim}")?;
                }
                Ok(())
            }
            Self::SecantNewton {
                iterate_initial,
                increment_initial,
            } => {
                f.write_str("SecantNewton")?;
                if iterate_initial {
                    f.write_str(" -iterate initial")?;
                }
                if increment_initial {
                    f.write_str(" -increment initial")?;
                }
                Ok(())
            }
            Self::Bfgs => f.write_str("BFGS"),
            Self::Broyden => f.write_str("Broyden"),
            Self::PeriodicNewton => f.write_str("PeriodicNewton"),
            Self::User { slot } => write!(f, "UserAlgorithm{slot}"),
        }
    }
}

/// Resolve `code` and install it on the solver.
///
/// An unknown code fails before the solver is touched.
pub fn apply_algorithm<S: ExternalSolver + ?Sized>(
    solver: &mut S,
    code: u32,
) -> AnalyzeResult<Algorithm> {
    let algorithm = Algorithm::from_code(code)?;
    info!(code, %algorithm, "Setting algorithm");
    solver.set_algorithm(&algorithm)?;
    Ok(algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedSolver, SolverCall};

    #[test]
    fn every_code_round_trips() {
        for code in ALGORITHM_CODES {
            let algorithm = Algorithm::from_code(code).expect("known code");
            assert_eq!(algorithm.code(), code, "code {code} -> {algorithm}");
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        for code in [3, 13, 24, 32, 46, 54, 61, 93, 100] {
            assert!(matches!(
                Algorithm::from_code(code),
                Err(AnalyzeError::UnknownAlgorithm { code: c }) if c == code
            ));
        }
    }

    #[test]
    fn krylov_variants_carry_options() {
        assert_eq!(
            Algorithm::from_code(43).unwrap(),
            Algorithm::KrylovNewton {
                iterate_initial: true,
                increment_initial: true,
                max_dim: None,
            }
        );
        assert_eq!(
            Algorithm::from_code(44).unwrap().to_string(),
            "KrylovNewton -maxDim 50"
        );
        assert_eq!(
            Algorithm::from_code(22).unwrap().to_string(),
            "NewtonLineSearch -type Secant"
        );
    }

    #[test]
    fn apply_unknown_code_leaves_solver_untouched() {
        let mut solver = ScriptedSolver::converging();
        let err = apply_algorithm(&mut solver, 99).unwrap_err();
        assert!(err.is_configuration());
        assert!(solver.calls().is_empty());
        assert!(solver.algorithm().is_none());
    }

    #[test]
    fn apply_known_code_configures_solver() {
        let mut solver = ScriptedSolver::converging();
        let algorithm = apply_algorithm(&mut solver, 60).unwrap();
        assert_eq!(algorithm, Algorithm::Bfgs);
        assert_eq!(solver.calls(), &[SolverCall::Algorithm(Algorithm::Bfgs)]);
    }
}
