//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::state::{PipelineRun, RunStatus, StageResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Archived record of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline: String,

    /// Triggering branch
    pub branch: String,

    /// Triggering event type
    pub event: String,

    /// Final status
    pub status: RunStatus,

    /// Exit code the run reported
    pub exit_code: i32,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run resolved
    pub finished_at: Option<DateTime<Utc>>,

    pub stages_succeeded: usize,
    pub stages_failed: usize,
    pub stages_skipped: usize,
    pub deployments_failed: usize,

    /// Full per-stage results
    pub stages: Vec<StageResult>,
}

impl RunSummary {
    /// Create a summary from a finished run
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id,
            pipeline: run.pipeline.clone(),
            branch: run.trigger.branch.clone(),
            event: run.trigger.event.to_string(),
            status: run.status(),
            exit_code: run.exit_code(),
            started_at: run.started_at.unwrap_or_else(Utc::now),
            finished_at: run.finished_at,
            stages_succeeded: run.succeeded_count(),
            stages_failed: run.failed_count(),
            stages_skipped: run.skipped_count(),
            deployments_failed: run.failed_deployments(),
            stages: run.stages.clone(),
        }
    }

    pub fn total_stages(&self) -> usize {
        self.stages.len()
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, most recent first
    async fn list_runs(&self, pipeline: &str) -> Result<Vec<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
    by_pipeline: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            by_pipeline: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        let replaced = runs.insert(run.run_id, run.clone()).is_some();

        if !replaced {
            let mut by_pipeline = self.by_pipeline.write().await;
            by_pipeline
                .entry(run.pipeline.clone())
                .or_insert_with(Vec::new)
                .push(run.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<RunSummary> = by_pipeline
            .get(pipeline)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
