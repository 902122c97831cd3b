//! Notification sink - reports the outcome of every admitted run

use crate::core::state::{DeployOutcome, PipelineRun, RunStatus, StageOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode run report: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("notification I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("notification command exited with code {0:?}")]
    Command(Option<i32>),
}

/// Per-deployment line of a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub name: String,
    pub provider: String,
    pub outcome: DeployOutcome,
}

/// Per-stage line of a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub outcome: StageOutcome,
    pub deployments: Vec<DeploymentReport>,
}

/// Payload delivered to every notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub branch: String,
    pub event: String,
    pub status: RunStatus,
    pub exit_code: i32,
    pub stages: Vec<StageReport>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id,
            pipeline: run.pipeline.clone(),
            branch: run.trigger.branch.clone(),
            event: run.trigger.event.to_string(),
            status: run.status(),
            exit_code: run.exit_code(),
            stages: run
                .stages
                .iter()
                .map(|stage| StageReport {
                    name: stage.stage.clone(),
                    outcome: stage.outcome.clone(),
                    deployments: stage
                        .deployments
                        .iter()
                        .map(|d| DeploymentReport {
                            name: d.deployment.clone(),
                            provider: d.provider.clone(),
                            outcome: d.outcome.clone(),
                        })
                        .collect(),
                })
                .collect(),
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }

    /// One-line human summary
    pub fn headline(&self) -> String {
        format!(
            "{} run {} on '{}' {} (exit code {})",
            self.pipeline,
            self.run_id,
            self.branch,
            self.status.as_str(),
            self.exit_code
        )
    }

    pub fn to_json(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A recipient of run reports
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> String;

    async fn notify(&self, report: &RunReport) -> Result<(), NotifyError>;
}

/// Writes the report to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> String {
        "log".to_string()
    }

    async fn notify(&self, report: &RunReport) -> Result<(), NotifyError> {
        match report.status {
            RunStatus::Succeeded => info!("{}", report.headline()),
            _ => warn!("{}", report.headline()),
        }
        for stage in &report.stages {
            match &stage.outcome {
                StageOutcome::Skipped { reason } => info!("  {} skipped: {}", stage.name, reason),
                StageOutcome::Succeeded { steps_run } => {
                    info!("  {} succeeded ({} steps)", stage.name, steps_run)
                }
                StageOutcome::Failed { failure } => warn!(
                    "  {} failed at step {} ({}) with exit code {}",
                    stage.name, failure.index, failure.step, failure.exit_code
                ),
            }
        }
        Ok(())
    }
}

/// Runs a shell command with the report in its environment
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
    workdir: Option<PathBuf>,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            workdir: None,
        }
    }

    /// Run the command from `dir` instead of the current directory
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    fn name(&self) -> String {
        format!("command: {}", self.command)
    }

    async fn notify(&self, report: &RunReport) -> Result<(), NotifyError> {
        let mut cmd = Command::new("sh");
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        let status = cmd
            .arg("-c")
            .arg(&self.command)
            .env("PIPELINE_STATUS", report.status.as_str())
            .env("PIPELINE_EXIT_CODE", report.exit_code.to_string())
            .env("PIPELINE_REPORT", report.to_json()?)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Command(status.code()))
        }
    }
}

/// Writes the JSON report to a file, creating parent directories
#[derive(Debug, Clone)]
pub struct FileNotifier {
    path: PathBuf,
}

impl FileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    fn name(&self) -> String {
        format!("file: {}", self.path.display())
    }

    async fn notify(&self, report: &RunReport) -> Result<(), NotifyError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, report.to_json()?).await?;
        Ok(())
    }
}

/// Delivers the run report to every configured notifier
#[derive(Clone, Default)]
pub struct NotificationSink {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Notify every recipient; failures are logged and otherwise ignored.
    ///
    /// Returns the report that was sent.
    pub async fn notify(&self, run: &PipelineRun) -> RunReport {
        let report = RunReport::from_run(run);
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&report).await {
                error!("Notifier '{}' failed: {}", notifier.name(), e);
            }
        }
        report
    }
}
