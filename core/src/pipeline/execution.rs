// songforge/src/pipeline/execution.rs

//! `Pipeline::run()`: executes steps in order against one shared context.

use crate::error::{ForgeError, ForgeResult};
use crate::pipeline::context_data::ContextData;
use crate::pipeline::control::{PipelineControl, PipelineResult};
use crate::pipeline::definition::Pipeline;
use tracing::{event, instrument, Instrument, Level};

impl<TData> Pipeline<TData>
where
  TData: 'static + Send + Sync,
{
  /// Runs every step in definition order.
  ///
  /// The first handler error aborts the run and is returned as-is. A handler
  /// returning `PipelineControl::Stop` ends the run with `PipelineResult::Stopped`.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(pipeline = self.name, num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> ForgeResult<PipelineResult> {
    event!(Level::DEBUG, "Pipeline execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();

      let handlers = match self.handlers.get(step_name) {
        Some(handlers) if !handlers.is_empty() => handlers,
        _ if step_def.optional => {
          event!(Level::DEBUG, step = step_name, "Optional step has no handlers, skipping.");
          continue;
        }
        _ => {
          event!(Level::ERROR, step = step_name, "Non-optional step has no handlers.");
          return Err(ForgeError::HandlerMissing {
            step_name: step_def.name.clone(),
          });
        }
      };

      let step_span = tracing::info_span!("pipeline_step", step_name, step_index = step_idx);
      for handler_fn in handlers {
        // The span is attached to the future so it never sits entered across an await.
        match handler_fn(ctx_data.clone()).instrument(step_span.clone()).await {
          Ok(PipelineControl::Continue) => {}
          Ok(PipelineControl::Stop) => {
            event!(Level::INFO, step = step_name, "Pipeline stopped by handler.");
            return Ok(PipelineResult::Stopped);
          }
          Err(e) => {
            event!(Level::ERROR, step = step_name, error = %e, "Step handler failed.");
            return Err(e);
          }
        }
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed.");
    Ok(PipelineResult::Completed)
  }
}
