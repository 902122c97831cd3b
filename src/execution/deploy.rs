//! Deployment fan-out - delivers a succeeded stage's artifacts to external channels

use crate::{
    core::{
        context::{render_template, RunContext},
        secret::{Redactor, Secret, SecretError, SecretStore},
        stage::{Deployment, Stage},
        state::{DeployOutcome, DeployResult, StageResult},
    },
    execution::{
        artifacts::{ArtifactRelay, ArtifactSet},
        collaborator::{run_process, CollaboratorError, ExitStatus},
    },
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Why a deployment could not deliver
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("unknown deployment provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{provider}' requires credential '{key}'")]
    MissingCredential { provider: String, key: String },

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("artifact selector {0:?} matched no files")]
    NoArtifacts(Vec<String>),

    #[error("invalid artifact selector: {0}")]
    Selector(String),

    #[error("provider '{0}' has no command to run")]
    NoCommand(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("provider '{provider}' exited with {status}")]
    Exit { provider: String, status: ExitStatus },

    #[error("cancelled")]
    Cancelled,
}

/// Everything a provider receives for one delivery
pub struct DeliveryRequest<'a> {
    pub deployment: &'a Deployment,
    pub stage: &'a str,
    pub run: &'a RunContext,
    pub artifacts: &'a ArtifactSet,

    /// Logical credential key -> resolved value
    pub credentials: BTreeMap<String, Secret>,
}

impl DeliveryRequest<'_> {
    /// Masks every resolved credential value
    pub fn redactor(&self) -> Redactor {
        Redactor::new(self.credentials.values())
    }
}

/// An external distribution channel
#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    /// Credential keys a deployment must declare
    fn required_credentials(&self) -> Vec<String> {
        Vec::new()
    }

    /// Artifact globs used when the deployment declares none
    fn default_artifacts(&self) -> Vec<String> {
        Vec::new()
    }

    async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<(), DeployError>;
}

/// Provider that runs an opaque upload tool through `sh -c`.
///
/// `{{ artifacts }}` in the command expands to the shell-quoted artifact
/// paths. Credentials are exported as environment variables: mapped keys under
/// their mapped name, any other key under its upper-cased name.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    id: String,
    command: Option<String>,
    credential_env: Vec<(String, String)>,
    default_artifacts: Vec<String>,
}

impl CommandProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: None,
            credential_env: Vec::new(),
            default_artifacts: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Require credential `key` and export it as `env_var`
    pub fn with_credential_env(mut self, key: impl Into<String>, env_var: impl Into<String>) -> Self {
        self.credential_env.push((key.into(), env_var.into()));
        self
    }

    pub fn with_default_artifacts<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_artifacts = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Package-index upload through twine
    pub fn pypi() -> Self {
        Self::new("pypi")
            .with_command("twine upload --non-interactive {{ artifacts }}")
            .with_credential_env("username", "TWINE_USERNAME")
            .with_credential_env("password", "TWINE_PASSWORD")
            .with_default_artifacts(["dist/*"])
    }

    /// Release upload for the most recent tag through the GitHub CLI
    pub fn github_releases() -> Self {
        Self::new("github_releases")
            .with_command("gh release create \"$(git describe --tags --abbrev=0)\" {{ artifacts }}")
            .with_credential_env("api_key", "GITHUB_TOKEN")
    }

    fn env_name(&self, key: &str) -> String {
        self.credential_env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, env)| env.clone())
            .unwrap_or_else(|| key.to_uppercase())
    }
}

#[async_trait]
impl DeploymentProvider for CommandProvider {
    fn required_credentials(&self) -> Vec<String> {
        self.credential_env.iter().map(|(k, _)| k.clone()).collect()
    }

    fn default_artifacts(&self) -> Vec<String> {
        self.default_artifacts.clone()
    }

    async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<(), DeployError> {
        let template = request
            .deployment
            .command
            .as_ref()
            .or(self.command.as_ref())
            .ok_or_else(|| DeployError::NoCommand(self.id.clone()))?;

        let mut variables: HashMap<String, String> = request.run.variables.clone();
        variables.insert("artifacts".to_string(), quote_paths(request.artifacts));
        let rendered = render_template(template, &variables);

        let mut env = request.run.env.clone();
        env.insert("PIPELINE_RUN_ID".to_string(), request.run.run_id.to_string());
        env.insert("PIPELINE_BRANCH".to_string(), request.run.trigger.branch.clone());
        env.insert("PIPELINE_EVENT".to_string(), request.run.trigger.event.to_string());
        env.insert("PIPELINE_STAGE".to_string(), request.stage.to_string());
        env.insert("PIPELINE_DEPLOYMENT".to_string(), request.deployment.name.clone());
        env.insert(
            "PIPELINE_WORKSPACE".to_string(),
            request.run.workspace.display().to_string(),
        );
        for (key, secret) in &request.credentials {
            env.insert(self.env_name(key), secret.expose().to_string());
        }

        let redactor = request.redactor();
        debug!("[deploy:{}] sh -c {}", request.deployment.name, redactor.redact(&rendered));

        let mut command = Command::new("sh");
        command.arg("-c").arg(&rendered);
        let label = format!("{}/deploy:{}", request.stage, request.deployment.name);
        let status = run_process(
            command,
            "sh",
            &request.run.workspace,
            &env,
            &label,
            &redactor,
        )
        .await?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::Exit {
                provider: self.id.clone(),
                status,
            })
        }
    }
}

fn quote_paths(artifacts: &ArtifactSet) -> String {
    artifacts
        .files()
        .iter()
        .map(|path| format!("'{}'", path.display().to_string().replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Provider id -> provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn DeploymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `pypi`, `github_releases` and `command` providers
    pub fn with_defaults() -> Self {
        Self::new()
            .with_provider("pypi", Arc::new(CommandProvider::pypi()))
            .with_provider("github_releases", Arc::new(CommandProvider::github_releases()))
            .with_provider("command", Arc::new(CommandProvider::new("command")))
    }

    pub fn with_provider(mut self, id: impl Into<String>, provider: Arc<dyn DeploymentProvider>) -> Self {
        self.register(id, provider);
        self
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn DeploymentProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DeploymentProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Provider for a deployment; unknown ids with their own command fall back to `command`
    fn for_deployment(&self, deployment: &Deployment) -> Result<Arc<dyn DeploymentProvider>, DeployError> {
        if let Some(provider) = self.get(&deployment.provider) {
            return Ok(provider);
        }
        if deployment.command.is_some() {
            if let Some(provider) = self.get("command") {
                return Ok(provider);
            }
        }
        Err(DeployError::UnknownProvider(deployment.provider.clone()))
    }
}

/// Runs the deployments of succeeded stages
#[derive(Clone)]
pub struct Deployer {
    registry: ProviderRegistry,
    secrets: Arc<dyn SecretStore>,
}

impl Deployer {
    pub fn new(registry: ProviderRegistry, secrets: Arc<dyn SecretStore>) -> Self {
        Self { registry, secrets }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn secrets(&self) -> Arc<dyn SecretStore> {
        self.secrets.clone()
    }

    /// Evaluate the deployment's condition and, if it holds, deliver its artifacts
    pub async fn deploy(
        &self,
        deployment: &Deployment,
        stage: &str,
        relay: &ArtifactRelay,
        ctx: &RunContext,
        upstream: &[StageResult],
    ) -> DeployResult {
        let outcome = if !deployment.condition.evaluate(&ctx.trigger, upstream) {
            info!(
                "Deployment {} skipped: condition '{}' not met",
                deployment.name, deployment.condition
            );
            DeployOutcome::Skipped {
                reason: format!("condition '{}' not met", deployment.condition),
            }
        } else {
            let attempt = self.attempt(deployment, stage, relay, ctx);
            let result = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => Err(DeployError::Cancelled),
                result = attempt => result,
            };
            match result {
                Ok(artifacts) => {
                    info!(
                        "Deployment {} delivered {} artifact(s)",
                        deployment.name,
                        artifacts.len()
                    );
                    DeployOutcome::Delivered { artifacts }
                }
                Err(e) => {
                    warn!("Deployment {} failed: {}", deployment.name, e);
                    DeployOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };

        DeployResult {
            deployment: deployment.name.clone(),
            provider: deployment.provider.clone(),
            outcome,
        }
    }

    /// Run every deployment of `stage` concurrently; results keep declaration order
    pub async fn fan_out(
        &self,
        stage: &Stage,
        relay: &ArtifactRelay,
        ctx: &RunContext,
        upstream: &[StageResult],
    ) -> Vec<DeployResult> {
        if stage.deployments.is_empty() {
            return Vec::new();
        }
        debug!(
            "Stage {} fanning out to {} deployment(s)",
            stage.name,
            stage.deployments.len()
        );
        join_all(
            stage
                .deployments
                .iter()
                .map(|deployment| self.deploy(deployment, &stage.name, relay, ctx, upstream)),
        )
        .await
    }

    async fn attempt(
        &self,
        deployment: &Deployment,
        stage: &str,
        relay: &ArtifactRelay,
        ctx: &RunContext,
    ) -> Result<Vec<PathBuf>, DeployError> {
        let provider = self.registry.for_deployment(deployment)?;

        for key in provider.required_credentials() {
            if !deployment.credentials.contains_key(&key) {
                return Err(DeployError::MissingCredential {
                    provider: deployment.provider.clone(),
                    key,
                });
            }
        }

        let selectors = if deployment.artifacts.is_empty() {
            provider.default_artifacts()
        } else {
            deployment.artifacts.clone()
        };
        let artifacts = relay
            .collect_all(&selectors)
            .map_err(|e| DeployError::Selector(e.to_string()))?;
        if !selectors.is_empty() && artifacts.is_empty() {
            return Err(DeployError::NoArtifacts(selectors));
        }

        let mut credentials = BTreeMap::new();
        for (key, secret_ref) in &deployment.credentials {
            credentials.insert(key.clone(), self.secrets.resolve(secret_ref)?);
        }

        let request = DeliveryRequest {
            deployment,
            stage,
            run: ctx,
            artifacts: &artifacts,
            credentials,
        };
        provider.deliver(&request).await?;

        Ok(artifacts.into_files())
    }
}
