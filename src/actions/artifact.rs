// src/actions/artifact.rs

//! `upload-artifact` and `download-artifact`.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use anyhow::{bail, Result};
use tracing::warn;

use crate::actions::{list_param, param, ActionContext, ActionResult};
use crate::fs::{restore_files, snapshot_files_skipping, FileTree};

const DEFAULT_NAME: &str = "artifact";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfNoFilesFound {
    Warn,
    Error,
    Ignore,
}

fn if_no_files_found(with: &BTreeMap<String, String>) -> Result<IfNoFilesFound> {
    Ok(match param(with, "if-no-files-found") {
        None | Some("warn") => IfNoFilesFound::Warn,
        Some("error") => IfNoFilesFound::Error,
        Some("ignore") => IfNoFilesFound::Ignore,
        Some(other) => bail!(
            "upload-artifact: invalid if-no-files-found '{}' (expected warn, error or ignore)",
            other
        ),
    })
}

/// Files picked up outside the working directory are stored under their
/// file name, so the artifact never refers back to a live path.
fn artifact_tree(files: FileTree) -> Result<FileTree> {
    let mut tree = FileTree::new();
    for (key, bytes) in files {
        let path = Path::new(&key);
        let outside = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        let key = if outside {
            match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => bail!("upload-artifact: cannot store '{}'", key),
            }
        } else {
            key
        };
        if tree.contains_key(&key) {
            bail!("upload-artifact: more than one file would be stored as '{}'", key);
        }
        tree.insert(key, bytes);
    }
    Ok(tree)
}

pub fn upload(with: &BTreeMap<String, String>, ctx: &ActionContext<'_>) -> Result<ActionResult> {
    let name = param(with, "name").unwrap_or(DEFAULT_NAME);
    let paths = list_param(with, "path");
    if paths.is_empty() {
        bail!("upload-artifact: `path` is required");
    }
    let policy = if_no_files_found(with)?;

    let files = artifact_tree(snapshot_files_skipping(
        ctx.fs,
        ctx.working_dir,
        &paths,
        ctx.engine_dirs,
    )?)?;
    let mut result = ActionResult::default();

    if files.is_empty() {
        let msg = format!("no files found for artifact '{}' at {}", name, paths.join(", "));
        match policy {
            IfNoFilesFound::Error => bail!("{}", msg),
            IfNoFilesFound::Warn => {
                warn!(job = %ctx.job, artifact = %name, "{}", msg);
                result.message(msg);
            }
            IfNoFilesFound::Ignore => result.message(msg),
        }
        result.output("files", "0");
        return Ok(result);
    }

    let manifest = ctx.artifacts.upload(name, ctx.job, files)?;
    result.message(format!(
        "uploaded artifact '{}' ({} file(s), {} bytes)",
        name,
        manifest.files.len(),
        manifest.size
    ));
    result.output("files", manifest.files.len().to_string());
    Ok(result)
}

pub fn download(with: &BTreeMap<String, String>, ctx: &ActionContext<'_>) -> Result<ActionResult> {
    let Some(name) = param(with, "name") else {
        bail!("download-artifact: `name` is required");
    };
    let target = ctx.working_dir.join(param(with, "path").unwrap_or("."));

    let artifact = ctx.artifacts.download(name, ctx.job)?;
    let n = restore_files(ctx.fs, &target, &artifact.files)?;

    let mut result = ActionResult::default();
    result.message(format!(
        "downloaded artifact '{}' from job '{}' ({} file(s))",
        name, artifact.producer, n
    ));
    result.output("download-path", target.to_string_lossy());
    Ok(result)
}
