//! Pipeline domain model

use crate::core::{
    config::{NotificationConfig, PipelineConfig},
    condition::Condition,
    state::{StageOutcome, StageResult},
    trigger::{Admission, TriggerEvent, TriggerFilter},
    stage::Stage,
};
use crate::execution::notify::{CommandNotifier, FileNotifier, LogNotifier, NotificationSink};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// A validated, ready-to-run pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Admission gate for the whole run
    pub trigger: TriggerFilter,

    /// Values for `{{ name }}` placeholders
    pub variables: HashMap<String, String>,

    /// Run-wide environment
    pub env: BTreeMap<String, String>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Recipients of the run report
    pub notifications: Vec<NotificationConfig>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, trigger: TriggerFilter) -> Self {
        Self {
            name: name.into(),
            trigger,
            variables: HashMap::new(),
            env: BTreeMap::new(),
            stages: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let stages = config
            .stages
            .iter()
            .map(|stage| stage.to_stage(config.default_timeout_secs))
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline {
            name: config.name.clone(),
            trigger: TriggerFilter::new(&config.trigger.branch),
            variables: config.variables_as_string_map(),
            env: config.env.clone(),
            stages,
            notifications: config.notifications.clone(),
        })
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_notification(mut self, notification: NotificationConfig) -> Self {
        self.notifications.push(notification);
        self
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Build the notifiers configured for this pipeline.
    ///
    /// Relative report paths and notification commands are resolved against
    /// `workspace`.
    pub fn notification_sink(&self, workspace: &Path) -> NotificationSink {
        self.notifications
            .iter()
            .fold(NotificationSink::new(), |sink, notification| match notification {
                NotificationConfig::Log => sink.with_notifier(Arc::new(LogNotifier)),
                NotificationConfig::Command { command } => sink.with_notifier(Arc::new(
                    CommandNotifier::new(command).with_workdir(workspace),
                )),
                NotificationConfig::File { path } => {
                    sink.with_notifier(Arc::new(FileNotifier::new(workspace.join(path))))
                }
            })
    }

    /// Dry evaluation of a trigger, assuming every admitted stage succeeds
    pub fn plan(&self, trigger: &TriggerEvent) -> Plan {
        let admission = self.trigger.admit(trigger);
        let mut stages = Vec::new();

        if admission.is_admitted() {
            let mut upstream: Vec<StageResult> = Vec::new();
            for stage in &self.stages {
                let admitted = stage.condition.evaluate(trigger, &upstream);
                upstream.push(if admitted {
                    StageResult::new(
                        &stage.name,
                        StageOutcome::Succeeded {
                            steps_run: stage.steps.len(),
                        },
                    )
                } else {
                    StageResult::skipped(&stage.name, "condition not met")
                });

                let deployments = if admitted {
                    stage
                        .deployments
                        .iter()
                        .map(|d| PlannedDeployment {
                            name: d.name.clone(),
                            provider: d.provider.clone(),
                            fires: d.condition.evaluate(trigger, &upstream),
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                stages.push(PlannedStage {
                    name: stage.name.clone(),
                    condition: stage.condition.clone(),
                    admitted,
                    steps: stage.steps.iter().map(|s| s.name.clone()).collect(),
                    deployments,
                });
            }
        }

        Plan { admission, stages }
    }
}

/// Outcome of [`Pipeline::plan`]
#[derive(Debug, Clone)]
pub struct Plan {
    pub admission: Admission,
    pub stages: Vec<PlannedStage>,
}

#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub name: String,
    pub condition: Condition,
    pub admitted: bool,
    pub steps: Vec<String>,
    pub deployments: Vec<PlannedDeployment>,
}

#[derive(Debug, Clone)]
pub struct PlannedDeployment {
    pub name: String,
    pub provider: String,
    pub fires: bool,
}
