//! Secret references and the stores that resolve them
//!
//! Deployments and steps carry only [`SecretRef`]s. The plain value is
//! resolved right before use and lives in a [`Secret`], which never prints or
//! serializes its contents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Error resolving a secret
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret '{0}' is not defined")]
    Missing(String),

    #[error("secret '{0}' is empty")]
    Empty(String),
}

/// Name of a secret held by a [`SecretStore`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved secret value
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Source of secret values
pub trait SecretStore: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> Result<Secret, SecretError>;
}

/// Resolves secrets from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `<prefix><name>` instead of `<name>`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable_name(&self, secret: &SecretRef) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, secret.name()),
            None => secret.name().to_string(),
        }
    }
}

impl SecretStore for EnvSecretStore {
    fn resolve(&self, secret: &SecretRef) -> Result<Secret, SecretError> {
        let var = self.variable_name(secret);
        match std::env::var(&var) {
            Ok(value) if value.is_empty() => Err(SecretError::Empty(secret.name().to_string())),
            Ok(value) => Ok(Secret::new(value)),
            Err(_) => Err(SecretError::Missing(secret.name().to_string())),
        }
    }
}

/// Fixed set of secrets, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: HashMap<String, Secret>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), Secret::new(value));
        self
    }
}

impl SecretStore for MemorySecretStore {
    fn resolve(&self, secret: &SecretRef) -> Result<Secret, SecretError> {
        self.secrets
            .get(secret.name())
            .cloned()
            .ok_or_else(|| SecretError::Missing(secret.name().to_string()))
    }
}

/// Replaces secret values in text before it is logged
#[derive(Clone, Default)]
pub struct Redactor {
    values: Vec<String>,
}

impl Redactor {
    pub fn new<'a>(secrets: impl IntoIterator<Item = &'a Secret>) -> Self {
        let mut values: Vec<String> = secrets
            .into_iter()
            .map(|s| s.expose().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        // Longest first so a secret containing another one is masked whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        Self { values }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for value in &self.values {
            redacted = redacted.replace(value.as_str(), "***");
        }
        redacted
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Redactor({} secrets)", self.values.len())
    }
}
