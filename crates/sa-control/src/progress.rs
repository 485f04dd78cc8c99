use serde::Serialize;

use crate::config::AnalysisKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressStage {
    Started,
    /// Emitted every `print_per` converged attempts.
    Periodic,
    /// Emitted after each top-level sub-step in debug mode.
    SegmentCompleted,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub analysis: AnalysisKind,
    pub stage: ProgressStage,
    pub completed: usize,
    pub total: usize,
    pub fraction_complete: f64,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
}
