//! Pipeline configuration from YAML

use crate::core::{
    condition::Condition,
    pipeline::Pipeline,
    secret::SecretRef,
    stage::{Deployment, RuntimeProfile, Stage, Step},
    trigger::EventKind,
};
use crate::execution::collaborator::{Collaborator, Script, ShellCommand};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Provider ids understood without a custom `command`
pub const BUILTIN_PROVIDERS: &[&str] = &["pypi", "github_releases", "command"];

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Branch gate for the whole run
    pub trigger: TriggerConfig,

    /// Values rendered into commands as `{{ key }}`
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Run-wide environment for every step
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Wall-clock budget for stages that do not set their own (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Stages in execution order
    pub stages: Vec<StageConfig>,

    /// Recipients of the run report
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Only pushes to exactly this branch start a run
    pub branch: String,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub runtime: Option<RuntimeConfig>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Precondition; the stage always runs when absent
    #[serde(default)]
    pub condition: Option<ConditionConfig>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Globs published when the stage succeeds
    #[serde(default)]
    pub artifacts: Vec<String>,

    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub deployments: Vec<DeploymentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub language: String,

    /// Accepts `3.7` as well as `"3.7"`
    #[serde(default)]
    pub version: Option<Value>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Defaults to `step-N`
    #[serde(default)]
    pub name: Option<String>,

    /// Inline shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Path to an external script, relative to the workspace
    #[serde(default)]
    pub script: Option<String>,

    /// Arguments passed to `script`
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Environment variable -> secret name, masked in the step's output
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    pub provider: String,

    /// Logical credential key -> secret name
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    #[serde(default)]
    pub artifacts: Vec<String>,

    #[serde(default)]
    pub condition: Option<ConditionConfig>,

    /// Replaces the provider's default command
    #[serde(default)]
    pub command: Option<String>,
}

/// Notification recipient configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationConfig {
    Log,
    Command { command: String },
    File { path: String },
}

/// Condition as written in YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionConfig {
    Keyword(ConditionKeyword),
    Branch { branch: String },
    Event { event: EventKind },
    StageSucceeded { stage_succeeded: String },
    And { and: Vec<ConditionConfig> },
    Or { or: Vec<ConditionConfig> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKeyword {
    Always,
    Never,
}

impl ConditionConfig {
    /// Convert to the domain condition; `and`/`or` lists fold left
    pub fn to_condition(&self) -> Result<Condition> {
        Ok(match self {
            ConditionConfig::Keyword(ConditionKeyword::Always) => Condition::Always,
            ConditionConfig::Keyword(ConditionKeyword::Never) => Condition::Never,
            ConditionConfig::Branch { branch } => Condition::branch(branch),
            ConditionConfig::Event { event } => Condition::EventIs(*event),
            ConditionConfig::StageSucceeded { stage_succeeded } => {
                Condition::stage_succeeded(stage_succeeded)
            }
            ConditionConfig::And { and } => fold(and, "and", Condition::and)?,
            ConditionConfig::Or { or } => fold(or, "or", Condition::or)?,
        })
    }
}

fn fold(
    items: &[ConditionConfig],
    operator: &str,
    combine: fn(Condition, Condition) -> Condition,
) -> Result<Condition> {
    let mut conditions = items.iter().map(ConditionConfig::to_condition);
    let first = conditions
        .next()
        .ok_or_else(|| anyhow::anyhow!("'{}' condition needs at least one operand", operator))??;
    conditions.try_fold(first, |acc, next| Ok(combine(acc, next?)))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl StepConfig {
    fn to_step(&self, index: usize) -> Result<Step> {
        let action: Arc<dyn Collaborator> = match (&self.run, &self.script) {
            (Some(run), None) => Arc::new(ShellCommand::new(run)),
            (None, Some(script)) => Arc::new(Script::new(script).with_args(self.args.clone())),
            _ => anyhow::bail!("Step {} must set exactly one of 'run' or 'script'", index + 1),
        };
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("step-{}", index + 1));

        let mut step = Step::new(name, action);
        step.env = self.env.clone();
        for (var, secret) in &self.credentials {
            step = step.with_credential(var, SecretRef::new(secret));
        }
        Ok(step)
    }
}

impl DeploymentConfig {
    fn to_deployment(&self) -> Result<Deployment> {
        let mut deployment = Deployment::new(&self.name, &self.provider).with_artifacts(self.artifacts.clone());
        for (key, secret) in &self.credentials {
            deployment = deployment.with_credential(key, SecretRef::new(secret));
        }
        if let Some(condition) = &self.condition {
            deployment = deployment.with_condition(condition.to_condition()?);
        }
        if let Some(command) = &self.command {
            deployment = deployment.with_command(command);
        }
        Ok(deployment)
    }
}

impl StageConfig {
    /// Build the domain stage; `default_timeout_secs` applies when the stage sets none
    pub fn to_stage(&self, default_timeout_secs: Option<u64>) -> Result<Stage> {
        let mut stage = Stage::new(&self.name);

        if let Some(runtime) = &self.runtime {
            stage = stage.with_runtime(RuntimeProfile::new(
                &runtime.language,
                runtime.version.as_ref().map(scalar_to_string),
            ));
        }
        stage.env = self.env.clone();
        if let Some(condition) = &self.condition {
            stage = stage.with_condition(condition.to_condition()?);
        }
        if let Some(secs) = self.timeout_secs.or(default_timeout_secs) {
            stage = stage.with_timeout(Duration::from_secs(secs));
        }
        for glob in &self.artifacts {
            stage = stage.with_artifact(glob);
        }
        for (index, step) in self.steps.iter().enumerate() {
            let step = step
                .to_step(index)
                .with_context(|| format!("Stage '{}'", self.name))?;
            stage = stage.with_step(step);
        }
        for deployment in &self.deployments {
            stage = stage.with_deployment(deployment.to_deployment()?);
        }
        Ok(stage)
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }
        if self.trigger.branch.trim().is_empty() {
            anyhow::bail!("Trigger branch must not be empty");
        }
        if self.default_timeout_secs == Some(0) {
            anyhow::bail!("default_timeout_secs must be greater than zero");
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                anyhow::bail!("Stage names must not be empty");
            }
            if earlier.contains(stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
            if stage.steps.is_empty() {
                anyhow::bail!("Stage '{}' has no steps", stage.name);
            }
            if stage.timeout_secs == Some(0) {
                anyhow::bail!("Stage '{}' timeout_secs must be greater than zero", stage.name);
            }

            for (index, step) in stage.steps.iter().enumerate() {
                match (&step.run, &step.script) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => anyhow::bail!(
                        "Stage '{}' step {} must set exactly one of 'run' or 'script'",
                        stage.name,
                        index + 1
                    ),
                }
                if step.run.is_some() && !step.args.is_empty() {
                    anyhow::bail!(
                        "Stage '{}' step {}: 'args' only applies to 'script' steps",
                        stage.name,
                        index + 1
                    );
                }
                for (var, secret) in &step.credentials {
                    if var.trim().is_empty() || secret.trim().is_empty() {
                        anyhow::bail!(
                            "Stage '{}' step {}: credentials need a variable and a secret name",
                            stage.name,
                            index + 1
                        );
                    }
                }
            }

            for glob in &stage.artifacts {
                validate_glob(glob).with_context(|| format!("Stage '{}'", stage.name))?;
            }

            if let Some(condition) = &stage.condition {
                validate_condition(condition, &earlier)
                    .with_context(|| format!("Stage '{}' condition", stage.name))?;
            }

            // Deployments run after their own stage, so they may refer to it
            let mut visible = earlier.clone();
            visible.insert(stage.name.as_str());
            let mut deployment_names = HashSet::new();
            for deployment in &stage.deployments {
                if !deployment_names.insert(deployment.name.as_str()) {
                    anyhow::bail!(
                        "Stage '{}' has duplicate deployment '{}'",
                        stage.name,
                        deployment.name
                    );
                }
                let builtin = BUILTIN_PROVIDERS.contains(&deployment.provider.as_str());
                if !builtin && deployment.command.is_none() {
                    anyhow::bail!(
                        "Deployment '{}' uses unknown provider '{}' and sets no command",
                        deployment.name,
                        deployment.provider
                    );
                }
                if deployment.provider == "command" && deployment.command.is_none() {
                    anyhow::bail!(
                        "Deployment '{}' uses the command provider but sets no command",
                        deployment.name
                    );
                }
                for glob in &deployment.artifacts {
                    validate_glob(glob)
                        .with_context(|| format!("Deployment '{}'", deployment.name))?;
                }
                if let Some(condition) = &deployment.condition {
                    validate_condition(condition, &visible)
                        .with_context(|| format!("Deployment '{}' condition", deployment.name))?;
                }
            }

            earlier.insert(stage.name.as_str());
        }

        for notification in &self.notifications {
            match notification {
                NotificationConfig::Command { command } if command.trim().is_empty() => {
                    anyhow::bail!("Command notification needs a non-empty command")
                }
                NotificationConfig::File { path } if path.trim().is_empty() => {
                    anyhow::bail!("File notification needs a non-empty path")
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Get variables as string map
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}

fn validate_glob(glob: &str) -> Result<()> {
    glob::Pattern::new(glob).with_context(|| format!("Invalid artifact glob '{}'", glob))?;
    Ok(())
}

fn validate_condition(condition: &ConditionConfig, earlier: &HashSet<&str>) -> Result<()> {
    for name in condition.to_condition()?.referenced_stages() {
        if !earlier.contains(name) {
            anyhow::bail!(
                "stage_succeeded refers to '{}', which is not declared earlier",
                name
            );
        }
    }
    Ok(())
}
