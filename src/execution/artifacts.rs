//! Artifact relay - hands files produced by one stage to later stages and deployments
//!
//! Artifacts are addressed by glob, relative to the run workspace. Nothing is
//! hashed or versioned: a later match for the same glob simply replaces the
//! earlier one.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files matched by one or more globs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    files: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn new(mut files: Vec<PathBuf>) -> Self {
        files.sort();
        files.dedup();
        Self { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn merge(&mut self, other: ArtifactSet) {
        self.files.extend(other.files);
        self.files.sort();
        self.files.dedup();
    }

    pub fn into_files(self) -> Vec<PathBuf> {
        self.files
    }
}

/// Per-run registry of published artifacts
#[derive(Debug, Clone)]
pub struct ArtifactRelay {
    workspace: PathBuf,
    published: BTreeMap<String, ArtifactSet>,
}

impl ArtifactRelay {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            published: BTreeMap::new(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Record the files `stage` produced for `pattern`
    pub fn publish(&mut self, stage: &str, pattern: &str) -> Result<ArtifactSet> {
        let set = self.collect(pattern)?;
        debug!("Stage {} published {} artifact(s) for '{}'", stage, set.len(), pattern);
        self.published
            .entry(stage.to_string())
            .or_default()
            .merge(set.clone());
        Ok(set)
    }

    /// Resolve `pattern` against the workspace as it is now
    pub fn collect(&self, pattern: &str) -> Result<ArtifactSet> {
        let absolute = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            let prefix = glob::Pattern::escape(&self.workspace.to_string_lossy());
            format!("{}/{}", prefix, pattern)
        };

        let files = glob::glob(&absolute)
            .with_context(|| format!("Invalid artifact glob '{}'", pattern))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();

        Ok(ArtifactSet::new(files))
    }

    /// Resolve several patterns into one set
    pub fn collect_all<S: AsRef<str>>(&self, patterns: &[S]) -> Result<ArtifactSet> {
        let mut set = ArtifactSet::default();
        for pattern in patterns {
            set.merge(self.collect(pattern.as_ref())?);
        }
        Ok(set)
    }

    /// Everything a stage published in this run
    pub fn published_by(&self, stage: &str) -> Option<&ArtifactSet> {
        self.published.get(stage)
    }
}
