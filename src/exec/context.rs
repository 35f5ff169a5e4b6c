// src/exec/context.rs

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value as Json};

use crate::artifact::ArtifactStore;
use crate::cache::CacheManager;
use crate::config::workflow::Workflow;
use crate::fs::FileSystem;
use crate::secrets::SecretStore;
use crate::trigger::EventContext;

/// Everything the jobs of one run share. Read-only once the run starts.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub workflow: Arc<Workflow>,
    pub event: EventContext,
    pub secrets: SecretStore,
    pub cache: CacheManager,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub fs: Arc<dyn FileSystem>,
    /// Root directory that relative paths and cache inputs resolve against.
    pub workspace: PathBuf,
    /// Per-run scratch space (`<work_dir>/<run_id>`).
    pub run_dir: PathBuf,
}

impl RunContext {
    /// Cache, artifact and run directories. Workspace walks skip them.
    pub fn engine_dirs(&self) -> Vec<PathBuf> {
        let config = &self.workflow.config;
        [&config.cache_dir, &config.artifact_dir, &config.work_dir]
            .into_iter()
            .map(|dir| self.workspace.join(dir))
            .collect()
    }

    /// The `ciflow` expression namespace.
    pub fn to_json(&self) -> Json {
        json!({
            "run_id": self.run_id,
            "workflow": self.workflow.name,
            "workspace": self.workspace.to_string_lossy(),
        })
    }
}
