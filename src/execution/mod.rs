//! Pipeline execution: collaborators, step executor, artifact relay,
//! deployment fan-out, notification and the engine tying them together

pub mod artifacts;
pub mod collaborator;
pub mod deploy;
pub mod engine;
pub mod executor;
pub mod notify;

pub use artifacts::{ArtifactRelay, ArtifactSet};
pub use collaborator::{Collaborator, CollaboratorError, ExitStatus, Script, ShellCommand};
pub use deploy::{CommandProvider, DeliveryRequest, DeployError, Deployer, DeploymentProvider, ProviderRegistry};
pub use engine::{EventHandler, EventSink, ExecutionEvent, PipelineEngine};
pub use executor::{StepExecutor, StepRun};
pub use notify::{
    CommandNotifier, FileNotifier, LogNotifier, NotificationSink, Notifier, NotifyError, RunReport,
};
