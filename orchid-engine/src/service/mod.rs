//! Service layer
//!
//! Services contain the engine's pipeline logic: turning a job definition
//! into a runnable pipeline and driving that pipeline to a terminal state.

mod builder;
mod execution;

pub use builder::PipelineBuilder;
pub use execution::PipelineRunner;
