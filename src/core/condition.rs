//! Gating conditions for stages and deployments

use crate::core::{
    state::StageResult,
    trigger::{EventKind, TriggerEvent},
};
use std::fmt;

/// A predicate over the trigger and the results of upstream stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Always holds
    Always,
    /// Never holds
    Never,
    /// Source branch equals the given name
    BranchEquals(String),
    /// Trigger event is of the given kind
    EventIs(EventKind),
    /// A stage declared earlier in the pipeline succeeded in this run
    StageSucceeded(String),
    /// Both hold
    And(Box<Condition>, Box<Condition>),
    /// At least one holds
    Or(Box<Condition>, Box<Condition>),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Always
    }
}

impl Condition {
    pub fn branch(name: impl Into<String>) -> Self {
        Condition::BranchEquals(name.into())
    }

    pub fn stage_succeeded(name: impl Into<String>) -> Self {
        Condition::StageSucceeded(name.into())
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate against the trigger and the stage results recorded so far
    pub fn evaluate(&self, trigger: &TriggerEvent, upstream: &[StageResult]) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::BranchEquals(name) => trigger.branch == *name,
            Condition::EventIs(kind) => trigger.event == *kind,
            Condition::StageSucceeded(name) => upstream
                .iter()
                .any(|r| r.stage == *name && r.outcome.is_succeeded()),
            Condition::And(a, b) => a.evaluate(trigger, upstream) && b.evaluate(trigger, upstream),
            Condition::Or(a, b) => a.evaluate(trigger, upstream) || b.evaluate(trigger, upstream),
        }
    }

    /// Names of the stages this condition refers to
    pub fn referenced_stages(&self) -> Vec<&str> {
        match self {
            Condition::StageSucceeded(name) => vec![name.as_str()],
            Condition::And(a, b) | Condition::Or(a, b) => {
                let mut names = a.referenced_stages();
                names.extend(b.referenced_stages());
                names
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "always"),
            Condition::Never => write!(f, "never"),
            Condition::BranchEquals(name) => write!(f, "branch == {}", name),
            Condition::EventIs(kind) => write!(f, "event == {}", kind),
            Condition::StageSucceeded(name) => write!(f, "stage '{}' succeeded", name),
            Condition::And(a, b) => write!(f, "({} and {})", a, b),
            Condition::Or(a, b) => write!(f, "({} or {})", a, b),
        }
    }
}
