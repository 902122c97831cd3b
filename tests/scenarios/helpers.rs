//! Test doubles and harness shared by the scenario tests

use async_trait::async_trait;
use stagehand::core::{
    context::StepContext, MemorySecretStore, Pipeline, PipelineRun, RunContext, TriggerEvent,
};
use stagehand::execution::{
    Collaborator, CollaboratorError, DeliveryRequest, DeployError, Deployer, DeploymentProvider,
    ExitStatus, Notifier, NotifyError, PipelineEngine, ProviderRegistry, RunReport,
};
use stagehand::persistence::InMemoryPersistence;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered log of collaborator invocations
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collaborator that records `name` and exits with `code`
    pub fn step(&self, name: &str, code: i32) -> Arc<dyn Collaborator> {
        Arc::new(MockCollaborator {
            name: name.to_string(),
            code,
            delay: None,
            writes: None,
            log: self.clone(),
        })
    }

    /// Like [`CallLog::step`], but writes `file` into the workspace first
    pub fn writing_step(&self, name: &str, file: &str) -> Arc<dyn Collaborator> {
        Arc::new(MockCollaborator {
            name: name.to_string(),
            code: 0,
            delay: None,
            writes: Some(file.to_string()),
            log: self.clone(),
        })
    }

    /// A collaborator that takes `delay` before exiting with 0
    pub fn slow_step(&self, name: &str, delay: Duration) -> Arc<dyn Collaborator> {
        Arc::new(MockCollaborator {
            name: name.to_string(),
            code: 0,
            delay: Some(delay),
            writes: None,
            log: self.clone(),
        })
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct MockCollaborator {
    name: String,
    code: i32,
    delay: Option<Duration>,
    writes: Option<String>,
    log: CallLog,
}

#[async_trait]
impl Collaborator for MockCollaborator {
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<ExitStatus, CollaboratorError> {
        self.log.record(&self.name);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(file) = &self.writes {
            let path = ctx.workspace().join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, &self.name).unwrap();
        }
        Ok(ExitStatus::from_code(self.code))
    }

    fn describe(&self) -> String {
        format!("mock {}", self.name)
    }
}

/// What a mock provider was handed
#[derive(Debug, Clone)]
pub struct Delivery {
    pub deployment: String,
    pub stage: String,
    pub artifacts: Vec<PathBuf>,
    pub credential_keys: Vec<String>,
}

/// Deployment provider double
#[derive(Clone, Default)]
pub struct MockProvider {
    fail: bool,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentProvider for MockProvider {
    async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<(), DeployError> {
        self.deliveries.lock().unwrap().push(Delivery {
            deployment: request.deployment.name.clone(),
            stage: request.stage.to_string(),
            artifacts: request.artifacts.files().to_vec(),
            credential_keys: request.credentials.keys().cloned().collect(),
        });
        if self.fail {
            Err(DeployError::Exit {
                provider: request.deployment.provider.clone(),
                status: ExitStatus::from_code(1),
            })
        } else {
            Ok(())
        }
    }
}

/// Notifier double keeping every report it receives
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    reports: Arc<Mutex<Vec<RunReport>>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> String {
        "recording".to_string()
    }

    async fn notify(&self, report: &RunReport) -> Result<(), NotifyError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Engine wired to doubles, with a temporary workspace
pub struct Harness {
    pub workspace: tempfile::TempDir,
    pub notifier: RecordingNotifier,
    pub history: Arc<InMemoryPersistence>,
    registry: ProviderRegistry,
    secrets: MemorySecretStore,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            workspace: tempfile::tempdir().unwrap(),
            notifier: RecordingNotifier::default(),
            history: Arc::new(InMemoryPersistence::new()),
            registry: ProviderRegistry::with_defaults(),
            secrets: MemorySecretStore::new()
                .with_secret("GITHUB_TOKEN", "gh-token")
                .with_secret("PYPI_USERNAME", "pypi-user")
                .with_secret("PYPI_PASSWORD", "pypi-password"),
        }
    }

    pub fn with_provider(mut self, id: &str, provider: MockProvider) -> Self {
        self.registry.register(id, Arc::new(provider));
        self
    }

    pub fn engine(&self) -> PipelineEngine {
        PipelineEngine::new(Deployer::new(self.registry.clone(), Arc::new(self.secrets.clone())))
            .with_notifier(Arc::new(self.notifier.clone()))
            .with_history(self.history.clone())
    }

    pub fn context(&self, branch: &str) -> RunContext {
        RunContext::new(TriggerEvent::push(branch), self.workspace.path())
    }

    pub async fn run(&self, pipeline: &Pipeline, branch: &str) -> PipelineRun {
        self.engine().execute(pipeline, &self.context(branch)).await
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.workspace.path().join(rel)
    }

    /// Names of the entries in the workspace root
    pub fn workspace_entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = std::fs::read_dir(self.workspace.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        entries
    }
}
