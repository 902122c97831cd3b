//! Stage, step and deployment domain models

use crate::core::{condition::Condition, secret::SecretRef};
use crate::execution::collaborator::Collaborator;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Named runtime a stage expects (language and version)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProfile {
    pub language: String,
    pub version: Option<String>,
}

impl RuntimeProfile {
    pub fn new(language: impl Into<String>, version: Option<String>) -> Self {
        Self {
            language: language.into(),
            version,
        }
    }

    /// Environment variables describing the profile
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PIPELINE_RUNTIME".to_string(), self.language.clone());
        if let Some(version) = &self.version {
            env.insert("PIPELINE_RUNTIME_VERSION".to_string(), version.clone());
        }
        env
    }
}

/// A single executable action within a stage
#[derive(Clone)]
pub struct Step {
    pub name: String,

    /// What the step invokes
    pub action: Arc<dyn Collaborator>,

    /// Step-level environment, applied last
    pub env: BTreeMap<String, String>,

    /// Environment variable -> secret exported to this step only
    pub credentials: BTreeMap<String, SecretRef>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: Arc<dyn Collaborator>) -> Self {
        Self {
            name: name.into(),
            action,
            env: BTreeMap::new(),
            credentials: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Export `secret` as `env_var`; its value is masked in the step's output
    pub fn with_credential(mut self, env_var: impl Into<String>, secret: SecretRef) -> Self {
        self.credentials.insert(env_var.into(), secret);
        self
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("action", &self.action.describe())
            .field("env", &self.env)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// An external distribution channel fed by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,

    /// Provider identity, looked up in the provider registry
    pub provider: String,

    /// Logical credential name -> secret reference
    pub credentials: BTreeMap<String, SecretRef>,

    /// Artifact globs handed to the provider
    pub artifacts: Vec<String>,

    /// Evaluated only after the owning stage succeeded
    pub condition: Condition,

    /// Replaces the provider's default command
    pub command: Option<String>,
}

impl Deployment {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            credentials: BTreeMap::new(),
            artifacts: Vec::new(),
            condition: Condition::Always,
            command: None,
        }
    }

    pub fn with_credential(mut self, key: impl Into<String>, secret: SecretRef) -> Self {
        self.credentials.insert(key.into(), secret);
        self
    }

    pub fn with_artifacts<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts = globs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// A named, independently gated phase of a run
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub runtime: Option<RuntimeProfile>,

    /// Stage-level environment, overrides the run environment
    pub env: BTreeMap<String, String>,

    /// Precondition; `Always` when none was declared
    pub condition: Condition,

    /// Executed strictly in order
    pub steps: Vec<Step>,

    /// Globs published to the artifact relay when the stage succeeds
    pub artifacts: Vec<String>,

    pub deployments: Vec<Deployment>,

    /// Wall-clock budget for all steps together
    pub timeout: Option<Duration>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: None,
            env: BTreeMap::new(),
            condition: Condition::Always,
            steps: Vec::new(),
            artifacts: Vec::new(),
            deployments: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeProfile) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_artifact(mut self, glob: impl Into<String>) -> Self {
        self.artifacts.push(glob.into());
        self
    }

    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.deployments.push(deployment);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
