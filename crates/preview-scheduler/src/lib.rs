//! Build lifecycle and stage orchestration for preview site builds.
//!
//! Drives a build through start, generate, assets, deploy and finish, one
//! queue item per step, with a single global building lock.

pub mod lifecycle;
pub mod orchestrator;
pub mod strategies;
pub mod sweeper;
pub mod worker;

pub use lifecycle::BuildLifecycle;
pub use orchestrator::{
    BuildEvent, BuildReport, BuildStep, PipelineOrchestrator, StepContext, StepResults,
};
pub use strategies::{ResolvedStrategy, StrategyCatalog};
pub use sweeper::Sweeper;
pub use worker::{QueueWorker, WorkerContext, worker_for};

#[cfg(test)]
pub(crate) mod testing;
