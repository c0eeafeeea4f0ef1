// songforge/src/pipeline/definition.rs

//! The `Pipeline<TData>` type: an ordered list of named steps, each carrying
//! zero or more async handlers that operate on a shared `ContextData<TData>`.

use crate::error::ForgeResult;
use crate::pipeline::context_data::ContextData;
use crate::pipeline::control::PipelineControl;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed async step handler. Receives a clone of the run's context handle.
pub type Handler<TData> = Box<
  dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = ForgeResult<PipelineControl>> + Send>>
    + Send
    + Sync,
>;

#[derive(Debug, Clone)]
pub struct StepDef {
  pub name: String,
  /// An optional step without handlers is skipped instead of failing the run.
  pub optional: bool,
}

pub struct Pipeline<TData>
where
  TData: 'static + Send + Sync,
{
  pub(crate) name: &'static str,
  pub(crate) steps: Vec<StepDef>,
  pub(crate) handlers: HashMap<String, Vec<Handler<TData>>>,
}

impl<TData> Pipeline<TData>
where
  TData: 'static + Send + Sync,
{
  /// Creates a pipeline from `(step_name, optional)` pairs, in execution order.
  pub fn new(name: &'static str, step_defs: &[(&str, bool)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(step_name, optional)| StepDef {
        name: (*step_name).to_string(),
        optional: *optional,
      })
      .collect();

    Self {
      name,
      steps,
      handlers: HashMap::new(),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  /// Panics on an unknown step name; that is a wiring mistake, not a runtime condition.
  fn ensure_step_exists(&self, step_name: &str) {
    if !self.steps.iter().any(|s| s.name == step_name) {
      panic!(
        "Pipeline '{}' setup error: step '{}' is not defined.",
        self.name, step_name
      );
    }
  }

  /// Registers a handler for `step_name`. Handlers of one step run in registration order.
  pub fn on_root<F>(&mut self, step_name: &str, handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static)
  where
    F: Future<Output = ForgeResult<PipelineControl>> + Send + 'static,
  {
    self.ensure_step_exists(step_name);
    let handler: Handler<TData> = Box::new(move |ctx_data| {
      let fut: Pin<Box<dyn Future<Output = ForgeResult<PipelineControl>> + Send>> = Box::pin(handler_fn(ctx_data));
      fut
    });
    self.handlers.entry(step_name.to_string()).or_default().push(handler);
  }
}
