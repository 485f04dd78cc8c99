//! Decomposition of a loading request into bounded sub-steps.

use sa_core::{ensure_finite, ensure_positive};
use serde::Serialize;

use crate::error::{AnalyzeError, AnalyzeResult};

/// Ordered sub-steps of a run, grouped into levels.
///
/// For static analysis a level is the path between two consecutive target
/// displacements. A transient plan has a single level.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepPlan {
    steps: Vec<f64>,
    /// Exclusive end index into `steps` of each level.
    level_ends: Vec<usize>,
}

impl StepPlan {
    /// One sub-step of `step` per output sample.
    pub fn transient(step: f64, point_count: usize) -> AnalyzeResult<Self> {
        ensure_finite(step, "transient step")?;
        if step == 0.0 {
            return Err(AnalyzeError::configuration("transient step must be nonzero"));
        }
        Ok(Self {
            steps: vec![step; point_count],
            level_ends: vec![point_count],
        })
    }

    /// Split a displacement protocol into sub-steps no longer than `max_step`.
    ///
    /// `targets` are absolute displacement levels starting from zero. Each
    /// level's increment is cut into `max_step`-sized pieces with the last
    /// piece taking the remainder. Repeated targets produce an empty level.
    pub fn displacement(max_step: f64, targets: &[f64]) -> AnalyzeResult<Self> {
        ensure_positive(max_step, "max_step")?;
        if targets.is_empty() {
            return Err(AnalyzeError::configuration(
                "at least one target displacement is required",
            ));
        }

        let mut steps = Vec::new();
        let mut level_ends = Vec::with_capacity(targets.len());
        let mut previous = 0.0;
        for &target in targets {
            ensure_finite(target, "target displacement")?;
            split_section(target - previous, max_step, &mut steps);
            level_ends.push(steps.len());
            previous = target;
        }

        Ok(Self { steps, level_ends })
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn level_ends(&self) -> &[usize] {
        &self.level_ends
    }

    /// Sub-steps of each level, in order.
    pub fn levels(&self) -> impl Iterator<Item = &[f64]> + '_ {
        let starts = std::iter::once(0).chain(self.level_ends.iter().copied());
        starts
            .zip(self.level_ends.iter().copied())
            .map(|(start, end)| &self.steps[start..end])
    }

    /// Sum of sub-step magnitudes.
    pub fn total_distance(&self) -> f64 {
        self.steps.iter().map(|s| s.abs()).sum()
    }
}

/// Append the pieces of one signed `section` to `out`.
fn split_section(section: f64, max_step: f64, out: &mut Vec<f64>) {
    if section == 0.0 {
        return;
    }
    let sign = section.signum();
    let magnitude = section.abs();
    let mut j = 0.0;
    while magnitude - j * max_step > max_step {
        out.push(sign * max_step);
        j += 1.0;
    }
    // Rounding can leave a non-positive remainder on exact multiples.
    let rest = section - sign * j * max_step;
    if rest * sign > 0.0 {
        out.push(rest);
    }
}
