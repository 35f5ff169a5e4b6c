// src/cache/key.rs

//! Cache key derivation from input file contents.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::{collect_matching_files_skipping, relative_str, FileSystem, PathMatcher};

/// Compute the hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash over `(relative path, file hash)` pairs.
///
/// `entries` must be sorted by path to keep the result stable.
pub fn compute_aggregate_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Hasher::new();
    for (path, hash) in entries {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
        hasher.update(&[b'\n']);
    }
    hasher.finalize().to_hex().to_string()
}

/// Hash of a raw byte string, used for directory names.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Inputs of a derived cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeySpec {
    pub prefix: String,
    pub version: String,
    /// Globs (workspace-relative) of files whose contents go into the key.
    pub files: Vec<String>,
}

/// `<prefix>-v<version>-<hash>` where `<hash>` covers every file matched by
/// `spec.files` under `workspace`. Bumping the version invalidates all
/// previous keys.
///
/// Files below `skip` (ciflow's own state directories) never take part, so
/// run reports and cache metadata cannot change the key.
pub fn derive_key(
    fs: &dyn FileSystem,
    workspace: &Path,
    spec: &CacheKeySpec,
    skip: &[PathBuf],
) -> Result<String> {
    let matcher = PathMatcher::new(&spec.files)?;
    let files = collect_matching_files_skipping(fs, workspace, &matcher, skip)?;

    let mut entries: Vec<(String, String)> = Vec::with_capacity(files.len());
    for file in files {
        let rel = relative_str(workspace, &file)
            .unwrap_or_else(|| file.to_string_lossy().into_owned());
        let hash = compute_file_hash(fs, &file)?;
        debug!(file = %rel, hash = %hash, "hashed cache input");
        entries.push((rel, hash));
    }
    entries.sort();

    let digest = compute_aggregate_hash(entries.iter().map(|(p, h)| (p.as_str(), h.as_str())));
    let key = format!("{}-v{}-{}", spec.prefix, spec.version, digest);
    debug!(key = %key, inputs = entries.len(), "derived cache key");
    Ok(key)
}
