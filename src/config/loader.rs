// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::RawWorkflowFile;
use crate::config::workflow::Workflow;
use crate::errors::Result;

/// Load a workflow file from a given path and return the raw `RawWorkflowFile`.
///
/// Files ending in `.yml` / `.yaml` are parsed as YAML, everything else as
/// TOML. This performs no semantic validation; use [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let mut raw: RawWorkflowFile = if is_yaml(path) {
        serde_yaml::from_str(&contents)?
    } else {
        toml::from_str(&contents)?
    };

    if raw.name.is_none() {
        raw.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
    }

    Ok(raw)
}

/// Load a workflow file from path, validate it and expand its matrices.
///
/// - Reads TOML or YAML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown or self `needs` references,
///   - DAG cycles,
///   - malformed steps and `if` conditions,
///   - basic engine config sanity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Workflow> {
    let raw = load_from_path(&path)?;
    let workflow = Workflow::try_from(raw)?;
    Ok(workflow)
}

/// `Ciflow.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Ciflow.toml")
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}
