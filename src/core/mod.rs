//! Core domain models for release pipelines
//!
//! This module defines the data structures that describe a pipeline (stages,
//! steps, deployments, conditions), the context a run executes in, and the
//! records a run produces.

pub mod config;
pub mod pipeline;
pub mod stage;
pub mod condition;
pub mod context;
pub mod secret;
pub mod state;
pub mod trigger;

pub use condition::Condition;
pub use config::PipelineConfig;
pub use context::{CancellationToken, RunContext, StepContext};
pub use pipeline::*;
pub use secret::{EnvSecretStore, MemorySecretStore, Secret, SecretRef, SecretStore};
pub use stage::*;
pub use state::*;
pub use trigger::*;
