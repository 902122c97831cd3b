//! stagehand - a staged release pipeline orchestrator
//!
//! A run is admitted by its trigger branch, evaluates stages in declared
//! order, relays artifacts between them, fans out deployments of succeeded
//! stages and reports the outcome once.

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::{
    CancellationToken, Condition, Pipeline, PipelineConfig, PipelineRun, RunContext, Stage,
    StageOutcome, StageResult, Step, TriggerEvent, TriggerFilter,
};
pub use execution::{Collaborator, Deployer, ExecutionEvent, PipelineEngine, ProviderRegistry};
pub use persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
