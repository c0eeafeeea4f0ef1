// songforge/src/pipeline/mod.rs

//! Named-step pipelines used to sequence fan-out and webhook ingest.

pub mod context_data;
pub mod control;
pub mod definition;
pub mod execution;

pub use context_data::ContextData;
pub use control::{PipelineControl, PipelineResult};
pub use definition::{Handler, Pipeline, StepDef};
