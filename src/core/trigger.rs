//! Trigger events and the run admission gate

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of event that started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A branch push
    Push,
    /// A pull request build
    PullRequest,
    /// A scheduled build
    Cron,
    /// A build requested through an API call
    Api,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Cron => "cron",
            EventKind::Api => "api",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The event a run is started from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Source branch of the event
    pub branch: String,

    /// Event type
    pub event: EventKind,
}

impl TriggerEvent {
    pub fn new(branch: impl Into<String>, event: EventKind) -> Self {
        Self {
            branch: branch.into(),
            event,
        }
    }

    /// A push to `branch`
    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(branch, EventKind::Push)
    }
}

/// Decision taken by the trigger filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { reason: String },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Admits a run only when the source branch equals the configured one.
///
/// Exact string comparison: no patterns, no negation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFilter {
    branch: String,
}

impl TriggerFilter {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn admit(&self, trigger: &TriggerEvent) -> Admission {
        if trigger.branch == self.branch {
            Admission::Admitted
        } else {
            Admission::Rejected {
                reason: format!(
                    "branch '{}' does not match trigger branch '{}'",
                    trigger.branch, self.branch
                ),
            }
        }
    }
}
