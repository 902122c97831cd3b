//! Run and stage outcome models

use crate::core::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Exit code reported when a stage exceeds its wall-clock budget
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code reported when a step could not be started
pub const EXIT_SPAWN_FAILED: i32 = 127;
/// Exit code reported when the run was cancelled
pub const EXIT_CANCELLED: i32 = 130;

/// Lifecycle phase of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created from a trigger, not yet filtered
    Pending,
    /// Trigger filter rejected the run
    Rejected,
    /// Stages are being evaluated
    Running,
    /// Every admitted stage and attempted deployment reached a terminal state
    Resolved,
    /// The notification sink has fired
    Notified,
    /// The run has been written to history
    Archived,
}

/// Overall outcome of a run, derived from its phase and stage results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Rejected,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Rejected => "rejected",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "rejected" => Some(RunStatus::Rejected),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Why a step ended its stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The process exited with a non-zero code
    NonZeroExit,
    /// The stage's wall-clock budget ran out while the step was running
    TimedOut,
    /// The run was cancelled while the step was running
    Cancelled,
    /// The step could not be started
    SpawnFailed { message: String },
}

/// Identity of the step that failed a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// 1-based position of the step in its stage
    pub index: usize,

    /// Step name
    pub step: String,

    /// Exit code propagated to the run status
    pub exit_code: i32,

    pub reason: FailureReason,
}

/// Terminal state of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Precondition unmet (or run cancelled); no step was executed
    Skipped { reason: String },
    /// Every step exited with 0
    Succeeded { steps_run: usize },
    /// A step failed; later steps did not run
    Failed { failure: StepFailure },
}

impl StageOutcome {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, StageOutcome::Skipped { .. })
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageOutcome::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            StageOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }
}

/// Outcome of a single deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeployOutcome {
    Delivered { artifacts: Vec<PathBuf> },
    Skipped { reason: String },
    Failed { error: String },
}

/// Record of a deployment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub deployment: String,
    pub provider: String,
    pub outcome: DeployOutcome,
}

impl DeployResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeployOutcome::Delivered { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, DeployOutcome::Failed { .. })
    }
}

/// Immutable record of a stage's outcome within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub outcome: StageOutcome,

    /// Files published by the stage
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,

    /// Deployments attempted after the stage succeeded
    #[serde(default)]
    pub deployments: Vec<DeployResult>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn new(stage: impl Into<String>, outcome: StageOutcome) -> Self {
        Self {
            stage: stage.into(),
            outcome,
            artifacts: Vec::new(),
            deployments: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            stage,
            StageOutcome::Skipped {
                reason: reason.into(),
            },
        )
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.finished_at = Some(finished_at);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_deployments(mut self, deployments: Vec<DeployResult>) -> Self {
        self.deployments = deployments;
        self
    }
}

/// One execution of a pipeline for a single trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline: String,
    pub trigger: TriggerEvent,
    pub phase: RunPhase,

    /// Results in stage declaration order
    pub stages: Vec<StageResult>,

    /// Set when an external cancellation request was honoured
    pub cancelled: bool,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(pipeline: impl Into<String>, trigger: TriggerEvent) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            trigger,
            phase: RunPhase::Pending,
            stages: Vec::new(),
            cancelled: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn reject(&mut self) {
        self.phase = RunPhase::Rejected;
        self.finished_at = Some(Utc::now());
    }

    pub fn start(&mut self) {
        self.phase = RunPhase::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn record(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    pub fn resolve(&mut self) {
        self.phase = RunPhase::Resolved;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_notified(&mut self) {
        self.phase = RunPhase::Notified;
    }

    pub fn mark_archived(&mut self) {
        self.phase = RunPhase::Archived;
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// First admitted stage that failed, with its failing step
    pub fn first_failure(&self) -> Option<(&StageResult, &StepFailure)> {
        self.stages
            .iter()
            .find_map(|s| s.outcome.failure().map(|f| (s, f)))
    }

    /// Whether every admitted stage succeeded; skipped stages do not count
    pub fn succeeded(&self) -> bool {
        self.stages
            .iter()
            .filter(|s| s.outcome.is_admitted())
            .all(|s| s.outcome.is_succeeded())
    }

    pub fn status(&self) -> RunStatus {
        match self.phase {
            RunPhase::Pending => RunStatus::Pending,
            RunPhase::Rejected => RunStatus::Rejected,
            RunPhase::Running => RunStatus::Running,
            RunPhase::Resolved | RunPhase::Notified | RunPhase::Archived => {
                if self.cancelled {
                    RunStatus::Cancelled
                } else if self.succeeded() {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                }
            }
        }
    }

    /// 0 when every admitted stage succeeded, else the first failing step's exit code
    pub fn exit_code(&self) -> i32 {
        match self.first_failure() {
            Some((_, failure)) => failure.exit_code,
            None if self.cancelled => EXIT_CANCELLED,
            None => 0,
        }
    }

    pub fn admitted_count(&self) -> usize {
        self.stages.iter().filter(|s| s.outcome.is_admitted()).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.stages.iter().filter(|s| s.outcome.is_succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.outcome.is_failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.stages.len() - self.admitted_count()
    }

    pub fn failed_deployments(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.deployments.iter())
            .filter(|d| d.is_failed())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stage: &str, index: usize, exit_code: i32) -> StageResult {
        StageResult::new(
            stage,
            StageOutcome::Failed {
                failure: StepFailure {
                    index,
                    step: format!("step-{}", index),
                    exit_code,
                    reason: FailureReason::NonZeroExit,
                },
            },
        )
    }

    #[test]
    fn test_skipped_stages_do_not_count_against_success() {
        let mut run = PipelineRun::new("p", TriggerEvent::push("staging"));
        run.start();
        run.record(StageResult::new("a", StageOutcome::Succeeded { steps_run: 2 }));
        run.record(StageResult::skipped("b", "condition unmet"));
        run.resolve();

        assert!(run.succeeded());
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.exit_code(), 0);
        assert_eq!(run.admitted_count(), 1);
        assert_eq!(run.skipped_count(), 1);
    }

    #[test]
    fn test_exit_code_is_first_failing_stage() {
        let mut run = PipelineRun::new("p", TriggerEvent::push("staging"));
        run.start();
        run.record(StageResult::new("a", StageOutcome::Succeeded { steps_run: 1 }));
        run.record(failed("b", 2, 3));
        run.record(failed("c", 1, 7));
        run.resolve();

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.exit_code(), 3);
        let (stage, failure) = run.first_failure().unwrap();
        assert_eq!(stage.stage, "b");
        assert_eq!(failure.index, 2);
        assert_eq!(run.failed_count(), 2);
    }

    #[test]
    fn test_phase_transitions() {
        let mut run = PipelineRun::new("p", TriggerEvent::push("x"));
        assert_eq!(run.status(), RunStatus::Pending);
        run.reject();
        assert_eq!(run.phase, RunPhase::Rejected);
        assert_eq!(run.status(), RunStatus::Rejected);
        assert!(run.stages.is_empty());

        let mut run = PipelineRun::new("p", TriggerEvent::push("x"));
        run.start();
        assert_eq!(run.status(), RunStatus::Running);
        run.resolve();
        run.mark_notified();
        run.mark_archived();
        assert_eq!(run.phase, RunPhase::Archived);
        assert_eq!(run.status(), RunStatus::Succeeded);
    }

    #[test]
    fn test_cancelled_run() {
        let mut run = PipelineRun::new("p", TriggerEvent::push("x"));
        run.start();
        run.record(StageResult::new(
            "a",
            StageOutcome::Failed {
                failure: StepFailure {
                    index: 1,
                    step: "long".to_string(),
                    exit_code: EXIT_CANCELLED,
                    reason: FailureReason::Cancelled,
                },
            },
        ));
        run.record(StageResult::skipped("b", "run cancelled"));
        run.cancelled = true;
        run.resolve();

        assert_eq!(run.status(), RunStatus::Cancelled);
        assert_eq!(run.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_run_status_round_trip_names() {
        for status in [
            RunStatus::Pending,
            RunStatus::Rejected,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }

    #[test]
    fn test_failed_deployments_counted() {
        let mut run = PipelineRun::new("p", TriggerEvent::push("x"));
        run.record(
            StageResult::new("a", StageOutcome::Succeeded { steps_run: 1 }).with_deployments(vec![
                DeployResult {
                    deployment: "d1".to_string(),
                    provider: "command".to_string(),
                    outcome: DeployOutcome::Failed {
                        error: "boom".to_string(),
                    },
                },
                DeployResult {
                    deployment: "d2".to_string(),
                    provider: "command".to_string(),
                    outcome: DeployOutcome::Delivered { artifacts: vec![] },
                },
            ]),
        );
        assert_eq!(run.failed_deployments(), 1);
        assert!(run.succeeded());
    }
}
