// src/actions/cache.rs

//! The `cache` action.
//!
//! ```toml
//! [[job.test.steps]]
//! uses = "cache"
//! with = { path = ".venv", prefix = "venv", files = "requirements*.txt", version = "2", restore-keys = "venv-v2-" }
//! ```
//!
//! `key` may be given instead of `prefix` + `files`. Outputs `cache-hit`,
//! `cache-key` and `cache-matched-key`. On anything but an exact hit a save
//! is queued for the end of the job.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use tracing::info;

use crate::actions::{list_param, param, ActionContext, ActionResult, PostAction};
use crate::cache::{derive_key, CacheKeySpec, CacheLookup};
use crate::fs::restore_files;

const DEFAULT_VERSION: &str = "1";

fn resolve_key(with: &BTreeMap<String, String>, ctx: &ActionContext<'_>) -> Result<String> {
    if let Some(key) = param(with, "key") {
        return Ok(key.to_string());
    }
    let Some(prefix) = param(with, "prefix") else {
        bail!("cache: either `key` or `prefix` must be set");
    };
    let files = list_param(with, "files");
    if files.is_empty() {
        bail!("cache: `files` is required together with `prefix`");
    }
    let spec = CacheKeySpec {
        prefix: prefix.to_string(),
        version: param(with, "version").unwrap_or(DEFAULT_VERSION).to_string(),
        files,
    };
    derive_key(ctx.fs, ctx.workspace, &spec, ctx.engine_dirs)
}

pub fn run(with: &BTreeMap<String, String>, ctx: &ActionContext<'_>) -> Result<ActionResult> {
    let paths = list_param(with, "path");
    if paths.is_empty() {
        bail!("cache: `path` is required");
    }
    let key = resolve_key(with, ctx)?;
    let restore_keys = list_param(with, "restore-keys");

    let mut result = ActionResult::default();
    result.output("cache-key", key.clone());

    let lookup = ctx.cache.restore(&key, &restore_keys);
    match &lookup {
        CacheLookup::Exact(entry) | CacheLookup::Partial(entry) => {
            let n = restore_files(ctx.fs, ctx.working_dir, &entry.files)?;
            info!(job = %ctx.job, key = %key, matched = %entry.key, files = n, "cache restored");
            result.message(format!("restored {} file(s) from cache key '{}'", n, entry.key));
            result.output("cache-matched-key", entry.key.clone());
        }
        CacheLookup::Miss => {
            result.message(format!("cache miss for key '{}'", key));
            result.output("cache-matched-key", "");
        }
    }

    result.output("cache-hit", if lookup.is_exact() { "true" } else { "false" });
    if !lookup.is_exact() {
        result.post.push(PostAction::SaveCache {
            key,
            root: ctx.working_dir.to_path_buf(),
            paths,
        });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use crate::artifact::MemoryArtifactStore;
    use crate::cache::{CacheManager, MemoryCacheStore};
    use crate::fs::mock::MockFileSystem;
    use crate::fs::FileSystem;

    fn with(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn miss_queues_save_then_exact_hit_restores() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/requirements.txt", "flask");
        fs.add_file("/ws/.venv/lib/flask.py", "code");
        let cache = CacheManager::new(Arc::new(MemoryCacheStore::new()));
        let artifacts = MemoryArtifactStore::new();
        let ctx = ActionContext {
            job: "test",
            workspace: Path::new("/ws"),
            working_dir: Path::new("/ws"),
            fs: &fs,
            cache: &cache,
            artifacts: &artifacts,
            engine_dirs: &[],
        };
        let params = with(&[("path", ".venv"), ("prefix", "venv"), ("files", "requirements.txt")]);

        let first = run(&params, &ctx).unwrap();
        assert_eq!(first.outputs["cache-hit"], "false");
        let key = first.outputs["cache-key"].clone();
        assert!(key.starts_with("venv-v1-"));
        let PostAction::SaveCache { paths, .. } = &first.post[0];
        assert_eq!(paths, &vec![".venv".to_string()]);

        let tree = crate::fs::snapshot_files(&fs, Path::new("/ws"), paths).unwrap();
        cache.save(&key, tree).unwrap();

        let fresh = MockFileSystem::new();
        fresh.add_file("/ws/requirements.txt", "flask");
        let ctx = ActionContext { fs: &fresh, ..ctx };
        let second = run(&params, &ctx).unwrap();
        assert_eq!(second.outputs["cache-hit"], "true");
        assert_eq!(second.outputs["cache-matched-key"], key);
        assert!(second.post.is_empty());
        assert_eq!(fresh.read(Path::new("/ws/.venv/lib/flask.py")).unwrap(), b"code");
    }

    #[test]
    fn requires_path_and_key_source() {
        let fs = MockFileSystem::new();
        let cache = CacheManager::new(Arc::new(MemoryCacheStore::new()));
        let artifacts = MemoryArtifactStore::new();
        let ctx = ActionContext {
            job: "j",
            workspace: Path::new("/ws"),
            working_dir: Path::new("/ws"),
            fs: &fs,
            cache: &cache,
            artifacts: &artifacts,
            engine_dirs: &[],
        };
        assert!(run(&with(&[("key", "k")]), &ctx).is_err());
        assert!(run(&with(&[("path", "x")]), &ctx).is_err());
        assert!(run(&with(&[("path", "x"), ("key", "k")]), &ctx).is_ok());
    }
}
