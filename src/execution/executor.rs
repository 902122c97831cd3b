//! Step executor - runs the steps of an admitted stage in order

use crate::{
    core::{
        context::{RunContext, StepContext},
        secret::{MemorySecretStore, Secret, SecretStore},
        stage::{Stage, Step},
        state::{
            FailureReason, StageOutcome, StepFailure, EXIT_CANCELLED, EXIT_SPAWN_FAILED,
            EXIT_TIMED_OUT,
        },
    },
    execution::{
        collaborator::{CollaboratorError, ExitStatus},
        engine::{EventSink, ExecutionEvent},
    },
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How a single step invocation ended
#[derive(Debug)]
pub enum StepRun {
    /// The collaborator ran to completion
    Exited(ExitStatus),
    /// The collaborator could not be invoked
    Error(CollaboratorError),
    /// The stage budget ran out
    TimedOut,
    /// The run was cancelled
    Cancelled,
}

impl StepRun {
    pub fn success(&self) -> bool {
        matches!(self, StepRun::Exited(status) if status.success())
    }

    /// Exit code this result contributes to the run status
    pub fn exit_code(&self) -> i32 {
        match self {
            StepRun::Exited(status) => status.code(),
            StepRun::Error(_) => EXIT_SPAWN_FAILED,
            StepRun::TimedOut => EXIT_TIMED_OUT,
            StepRun::Cancelled => EXIT_CANCELLED,
        }
    }

    fn failure_reason(&self) -> FailureReason {
        match self {
            StepRun::Exited(_) => FailureReason::NonZeroExit,
            StepRun::Error(e) => FailureReason::SpawnFailed {
                message: e.to_string(),
            },
            StepRun::TimedOut => FailureReason::TimedOut,
            StepRun::Cancelled => FailureReason::Cancelled,
        }
    }
}

/// Executes the steps of a stage strictly in declared order.
///
/// The first step that does not exit with 0 aborts the stage. Side effects of
/// steps that already ran are left in place.
#[derive(Clone)]
pub struct StepExecutor {
    secrets: Arc<dyn SecretStore>,
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self {
            secrets: Arc::new(MemorySecretStore::new()),
        }
    }
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve step credentials from `secrets`
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    fn resolve_credentials(&self, step: &Step) -> Result<BTreeMap<String, Secret>, CollaboratorError> {
        let mut resolved = BTreeMap::new();
        for (var, secret_ref) in &step.credentials {
            resolved.insert(var.clone(), self.secrets.resolve(secret_ref)?);
        }
        Ok(resolved)
    }

    /// Run every step of `stage` and report the stage outcome
    pub async fn run(&self, stage: &Stage, ctx: &RunContext, events: &EventSink) -> StageOutcome {
        info!("Running stage: {} ({} steps)", stage.name, stage.steps.len());

        let deadline = stage.timeout.map(|budget| Instant::now() + budget);

        for (index, step) in stage.steps.iter().enumerate() {
            let position = index + 1;
            events.emit(ExecutionEvent::StepStarted {
                stage: stage.name.clone(),
                step: step.name.clone(),
                index: position,
            });

            let result = if ctx.cancellation.is_cancelled() {
                StepRun::Cancelled
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                StepRun::TimedOut
            } else {
                match self.resolve_credentials(step) {
                    Ok(credentials) => {
                        let step_ctx =
                            StepContext::new(ctx, stage, index).with_credentials(credentials);
                        debug!("Step {}/{}: {}", stage.name, step.name, step.action.describe());
                        let invocation = step.action.execute(&step_ctx);
                        tokio::select! {
                            biased;
                            _ = ctx.cancellation.cancelled() => StepRun::Cancelled,
                            result = with_deadline(deadline, invocation) => result,
                        }
                    }
                    Err(e) => StepRun::Error(e),
                }
            };

            events.emit(ExecutionEvent::StepFinished {
                stage: stage.name.clone(),
                step: step.name.clone(),
                index: position,
                success: result.success(),
                exit_code: result.exit_code(),
            });

            if !result.success() {
                match &result {
                    StepRun::Exited(status) => {
                        warn!("Step {}/{} failed with {}", stage.name, step.name, status)
                    }
                    StepRun::Error(e) => error!("Step {}/{} could not run: {}", stage.name, step.name, e),
                    StepRun::TimedOut => warn!(
                        "Stage {} exceeded its budget of {}s during step {}",
                        stage.name,
                        stage.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                        step.name
                    ),
                    StepRun::Cancelled => warn!("Step {}/{} cancelled", stage.name, step.name),
                }

                return StageOutcome::Failed {
                    failure: StepFailure {
                        index: position,
                        step: step.name.clone(),
                        exit_code: result.exit_code(),
                        reason: result.failure_reason(),
                    },
                };
            }
        }

        info!("Stage {} succeeded", stage.name);
        StageOutcome::Succeeded {
            steps_run: stage.steps.len(),
        }
    }
}

async fn with_deadline<F>(deadline: Option<Instant>, invocation: F) -> StepRun
where
    F: Future<Output = Result<ExitStatus, CollaboratorError>>,
{
    let result = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, invocation).await {
            Ok(result) => result,
            Err(_) => return StepRun::TimedOut,
        },
        None => invocation.await,
    };

    match result {
        Ok(status) => StepRun::Exited(status),
        Err(e) => StepRun::Error(e),
    }
}
