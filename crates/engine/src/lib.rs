//! Query-answering engine: pipeline, workflow orchestration and the
//! caller surface.

pub mod engine;
pub mod pipeline;
pub mod tracing_setup;
pub mod workflow;

pub use engine::Engine;
pub use pipeline::{PipelineOutcome, QueryPipeline};
pub use workflow::WorkflowManager;
