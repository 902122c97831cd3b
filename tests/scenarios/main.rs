//! End-to-end scenarios driving the engine with test doubles

mod helpers;

mod cancellation;
mod deployments;
mod release_pipeline;
mod stage_failure;
mod trigger_filter;
