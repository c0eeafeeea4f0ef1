// songforge/src/pipeline/control.rs

//! Signals for steering a pipeline run and the outcome of a run.

/// Returned by a step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  /// Proceed with the remaining handlers and steps.
  Continue,
  /// Halt the run. Remaining handlers and steps are not executed.
  Stop,
}

/// Outcome of a full pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  Completed,
  /// A handler returned `PipelineControl::Stop`.
  Stopped,
}
