//! Run context - the explicit state threaded through every stage, step and deployment

use crate::core::{
    secret::{Redactor, Secret},
    stage::Stage,
    trigger::TriggerEvent,
};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use uuid::Uuid;

/// Cooperative cancellation shared between the caller and a running pipeline
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so wait_for only returns once the flag is set
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context for one pipeline run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub trigger: TriggerEvent,

    /// Working directory shared by every stage of the run
    pub workspace: PathBuf,

    /// Values substituted into `{{ name }}` placeholders
    pub variables: HashMap<String, String>,

    /// Run-wide environment exposed to every step
    pub env: BTreeMap<String, String>,

    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(trigger: TriggerEvent, workspace: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            workspace: workspace.into(),
            variables: HashMap::new(),
            env: BTreeMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Substitute `{{ name }}` placeholders; unknown names are left untouched
    pub fn render(&self, template: &str) -> String {
        render_template(template, &self.variables)
    }

    /// Resolve a workspace-relative path
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// Merged environment for a stage: run env, runtime profile, run identity, stage env
    pub fn stage_env(&self, stage: &Stage) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(runtime) = &stage.runtime {
            env.extend(runtime.env());
        }
        env.insert("PIPELINE_RUN_ID".to_string(), self.run_id.to_string());
        env.insert("PIPELINE_BRANCH".to_string(), self.trigger.branch.clone());
        env.insert("PIPELINE_EVENT".to_string(), self.trigger.event.to_string());
        env.insert("PIPELINE_STAGE".to_string(), stage.name.clone());
        env.insert(
            "PIPELINE_WORKSPACE".to_string(),
            self.workspace.display().to_string(),
        );
        env.extend(stage.env.clone());
        env
    }
}

/// What a collaborator sees when it is invoked for a step
#[derive(Debug)]
pub struct StepContext<'a> {
    pub run: &'a RunContext,
    pub stage: &'a str,
    pub step: &'a str,

    /// Fully merged environment for this step
    pub env: BTreeMap<String, String>,

    /// Masks the step's credentials in its output
    pub redactor: Redactor,
}

impl<'a> StepContext<'a> {
    pub fn new(run: &'a RunContext, stage: &'a Stage, index: usize) -> Self {
        let step = &stage.steps[index];
        let mut env = run.stage_env(stage);
        env.extend(step.env.clone());
        Self {
            run,
            stage: &stage.name,
            step: &step.name,
            env,
            redactor: Redactor::default(),
        }
    }

    /// Export resolved credentials into the environment and mask them in output
    pub fn with_credentials(mut self, credentials: BTreeMap<String, Secret>) -> Self {
        self.redactor = Redactor::new(credentials.values());
        for (var, secret) in credentials {
            self.env.insert(var, secret.expose().to_string());
        }
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.run.workspace
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Substitute `{{ name }}` placeholders from `variables`
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
