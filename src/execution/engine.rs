//! Main execution engine - orchestrates a pipeline run from trigger to archive

use crate::{
    core::{
        context::RunContext,
        pipeline::Pipeline,
        stage::Stage,
        state::{
            DeployResult, FailureReason, PipelineRun, RunStatus, StageOutcome, StageResult,
        },
        trigger::Admission,
    },
    execution::{
        artifacts::ArtifactRelay,
        deploy::Deployer,
        executor::StepExecutor,
        notify::{NotificationSink, Notifier},
    },
    persistence::{PersistenceBackend, RunSummary},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        branch: String,
        total_stages: usize,
    },
    RunRejected {
        run_id: Uuid,
        pipeline: String,
        reason: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    StageStarted {
        stage: String,
        total_steps: usize,
    },
    StepStarted {
        stage: String,
        step: String,
        index: usize,
    },
    StepFinished {
        stage: String,
        step: String,
        index: usize,
        success: bool,
        exit_code: i32,
    },
    StageFinished {
        stage: String,
        outcome: StageOutcome,
    },
    DeploymentFinished {
        stage: String,
        result: DeployResult,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        exit_code: i32,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fans events out to every registered handler
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Vec<EventHandler>,
}

impl EventSink {
    pub fn add(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(event.clone());
        }
    }
}

/// Main pipeline execution engine
pub struct PipelineEngine {
    executor: StepExecutor,
    deployer: Deployer,
    notifiers: Vec<Arc<dyn Notifier>>,
    history: Option<Arc<dyn PersistenceBackend>>,
    events: EventSink,
}

impl PipelineEngine {
    pub fn new(deployer: Deployer) -> Self {
        Self {
            executor: StepExecutor::new().with_secrets(deployer.secrets()),
            deployer,
            notifiers: Vec::new(),
            history: None,
            events: EventSink::default(),
        }
    }

    /// Notify `notifier` in addition to the pipeline's configured notifications
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Archive finished runs to `backend`
    pub fn with_history(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.history = Some(backend);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.add(Arc::new(handler));
    }

    /// Execute one run of `pipeline` for the trigger in `ctx`
    pub async fn execute(&self, pipeline: &Pipeline, ctx: &RunContext) -> PipelineRun {
        let mut run = PipelineRun::new(&pipeline.name, ctx.trigger.clone());
        run.run_id = ctx.run_id;

        if let Admission::Rejected { reason } = pipeline.trigger.admit(&ctx.trigger) {
            info!("Run {} of {} rejected: {}", run.run_id, pipeline.name, reason);
            run.reject();
            self.events.emit(ExecutionEvent::RunRejected {
                run_id: run.run_id,
                pipeline: pipeline.name.clone(),
                reason,
            });
            return run;
        }

        let ctx = scoped_context(pipeline, ctx);
        info!(
            "Starting run {} of {} on branch '{}'",
            run.run_id, pipeline.name, ctx.trigger.branch
        );
        run.start();
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: run.run_id,
            pipeline: pipeline.name.clone(),
            branch: ctx.trigger.branch.clone(),
            total_stages: pipeline.stages.len(),
        });

        let mut relay = ArtifactRelay::new(&ctx.workspace);
        for stage in &pipeline.stages {
            let result = self.run_stage(stage, &ctx, &mut relay, &run.stages).await;
            run.record(result);
        }

        run.cancelled = ctx.cancellation.is_cancelled();
        run.resolve();

        let mut sink = pipeline.notification_sink(&ctx.workspace);
        for notifier in &self.notifiers {
            sink = sink.with_notifier(notifier.clone());
        }
        self.notify(&sink, &mut run).await;
        self.archive(&mut run).await;

        self.events.emit(ExecutionEvent::RunFinished {
            run_id: run.run_id,
            status: run.status(),
            exit_code: run.exit_code(),
        });
        run
    }

    /// Evaluate, execute and deploy a single stage
    async fn run_stage(
        &self,
        stage: &Stage,
        ctx: &RunContext,
        relay: &mut ArtifactRelay,
        upstream: &[StageResult],
    ) -> StageResult {
        if ctx.cancellation.is_cancelled() {
            return self.skip(stage, "run cancelled".to_string());
        }
        if !stage.condition.evaluate(&ctx.trigger, upstream) {
            return self.skip(stage, format!("condition '{}' not met", stage.condition));
        }

        self.events.emit(ExecutionEvent::StageStarted {
            stage: stage.name.clone(),
            total_steps: stage.steps.len(),
        });
        let started_at = Utc::now();
        let outcome = self.executor.run(stage, ctx, &self.events).await;

        let mut artifacts = Vec::new();
        let mut deployments = Vec::new();
        if outcome.is_succeeded() {
            for pattern in &stage.artifacts {
                if let Err(e) = relay.publish(&stage.name, pattern) {
                    warn!("Stage {}: {:#}", stage.name, e);
                }
            }
            if let Some(published) = relay.published_by(&stage.name) {
                artifacts = published.files().to_vec();
            }

            if !ctx.cancellation.is_cancelled() {
                // Deployment conditions may name their own stage
                let mut visible = upstream.to_vec();
                visible.push(StageResult::new(&stage.name, outcome.clone()));
                deployments = self.deployer.fan_out(stage, relay, ctx, &visible).await;
                for result in &deployments {
                    self.events.emit(ExecutionEvent::DeploymentFinished {
                        stage: stage.name.clone(),
                        result: result.clone(),
                    });
                }
            }
        } else if let Some(failure) = outcome.failure() {
            if failure.reason != FailureReason::Cancelled {
                info!(
                    "Stage {} failed; deployments of this stage will not run",
                    stage.name
                );
            }
        }

        self.events.emit(ExecutionEvent::StageFinished {
            stage: stage.name.clone(),
            outcome: outcome.clone(),
        });

        StageResult::new(&stage.name, outcome)
            .with_timing(started_at, Utc::now())
            .with_artifacts(artifacts)
            .with_deployments(deployments)
    }

    fn skip(&self, stage: &Stage, reason: String) -> StageResult {
        info!("Stage {} skipped: {}", stage.name, reason);
        self.events.emit(ExecutionEvent::StageSkipped {
            stage: stage.name.clone(),
            reason: reason.clone(),
        });
        StageResult::skipped(&stage.name, reason)
    }

    async fn notify(&self, sink: &NotificationSink, run: &mut PipelineRun) {
        if !sink.is_empty() {
            sink.notify(run).await;
        }
        run.mark_notified();
    }

    async fn archive(&self, run: &mut PipelineRun) {
        let Some(history) = &self.history else {
            return;
        };
        match history.save_run(&RunSummary::from_run(run)).await {
            Ok(()) => run.mark_archived(),
            Err(e) => error!("Failed to archive run {}: {:#}", run.run_id, e),
        }
    }
}

/// Layer the run's variables and environment over the pipeline's
fn scoped_context(pipeline: &Pipeline, ctx: &RunContext) -> RunContext {
    let mut variables = pipeline.variables.clone();
    variables.extend(ctx.variables.clone());
    let mut env = pipeline.env.clone();
    env.extend(ctx.env.clone());

    let mut scoped = ctx.clone();
    scoped.variables = variables;
    scoped.env = env;
    scoped
}
