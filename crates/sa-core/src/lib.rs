//! sa-core: shared foundation for smartanalyze.
//!
//! Contains:
//! - numeric (Real + tolerances + float checks)
//! - timing (wall-clock stopwatch for progress reports)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod timing;

pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use timing::Stopwatch;
