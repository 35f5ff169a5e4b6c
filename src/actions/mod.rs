// src/actions/mod.rs

//! Built-in actions available to `uses` steps.
//!
//! - `cache`: restore a directory snapshot by key, save it after the job.
//! - `upload-artifact` / `download-artifact`: hand files to later jobs.
//!
//! References are normalised, so `cache`, `cache@v1` and `actions/cache@v4`
//! all name the same action.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::artifact::ArtifactStore;
use crate::cache::CacheManager;
use crate::fs::FileSystem;

pub mod artifact;
pub mod cache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    Cache,
    UploadArtifact,
    DownloadArtifact,
}

impl BuiltinAction {
    pub fn resolve(reference: &str) -> Option<Self> {
        match normalize(reference) {
            "cache" => Some(BuiltinAction::Cache),
            "upload-artifact" => Some(BuiltinAction::UploadArtifact),
            "download-artifact" => Some(BuiltinAction::DownloadArtifact),
            _ => None,
        }
    }
}

/// `actions/cache@v4` -> `cache`.
fn normalize(reference: &str) -> &str {
    let without_version = reference.trim().split('@').next().unwrap_or_default();
    without_version.rsplit('/').next().unwrap_or_default()
}

pub fn is_builtin_action(reference: &str) -> bool {
    BuiltinAction::resolve(reference).is_some()
}

/// Everything an action may touch.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub job: &'a str,
    /// Workspace root; cache input globs are relative to it.
    pub workspace: &'a Path,
    /// The step's working directory; `path` parameters are relative to it.
    pub working_dir: &'a Path,
    pub fs: &'a dyn FileSystem,
    pub cache: &'a CacheManager,
    pub artifacts: &'a dyn ArtifactStore,
    /// ciflow's own state directories; never hashed or snapshotted.
    pub engine_dirs: &'a [PathBuf],
}

/// Work deferred until the job has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Snapshot `paths` under `root` and store them as `key`. Only runs when
    /// the job succeeded.
    SaveCache {
        key: String,
        root: PathBuf,
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResult {
    /// Published as `steps.<id>.outputs.*`.
    pub outputs: BTreeMap<String, String>,
    pub post: Vec<PostAction>,
    /// Human-readable lines for the step log.
    pub messages: Vec<String>,
}

impl ActionResult {
    fn output(&mut self, name: &str, value: impl Into<String>) {
        self.outputs.insert(name.to_string(), value.into());
    }

    fn message(&mut self, line: impl Into<String>) {
        self.messages.push(line.into());
    }
}

/// Run the action named by `reference`. An error fails the step.
pub fn run_action(
    reference: &str,
    with: &BTreeMap<String, String>,
    ctx: &ActionContext<'_>,
) -> Result<ActionResult> {
    match BuiltinAction::resolve(reference) {
        Some(BuiltinAction::Cache) => cache::run(with, ctx),
        Some(BuiltinAction::UploadArtifact) => artifact::upload(with, ctx),
        Some(BuiltinAction::DownloadArtifact) => artifact::download(with, ctx),
        None => bail!("unknown action '{}'", reference),
    }
}

/// A list-valued parameter: one entry per line (commas also separate).
pub(crate) fn list_param(with: &BTreeMap<String, String>, name: &str) -> Vec<String> {
    with.get(name)
        .map(|v| {
            v.split(['\n', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn param<'a>(with: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    with.get(name).map(|s| s.trim()).filter(|s| !s.is_empty())
}
