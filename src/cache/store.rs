// src/cache/store.rs

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::key::{compute_aggregate_hash, hash_bytes};
use crate::fs::{FileSystem, FileTree};

/// A cached directory snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub files: FileTree,
    /// Digest over all `(path, content hash)` pairs at save time.
    pub digest: String,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, files: FileTree) -> Self {
        let digest = tree_digest(&files);
        Self {
            key: key.into(),
            created_at: Utc::now(),
            files,
            digest,
        }
    }

    /// Whether the stored bytes still match the digest recorded at save time.
    pub fn verify(&self) -> bool {
        tree_digest(&self.files) == self.digest
    }

    pub fn meta(&self) -> CacheMeta {
        CacheMeta {
            key: self.key.clone(),
            created_at: self.created_at,
            files: self
                .files
                .iter()
                .map(|(path, bytes)| FileMeta {
                    path: path.clone(),
                    hash: hash_bytes(bytes),
                    size: bytes.len() as u64,
                })
                .collect(),
            digest: self.digest.clone(),
        }
    }
}

pub fn tree_digest(files: &FileTree) -> String {
    let hashes: Vec<(&str, String)> = files
        .iter()
        .map(|(p, b)| (p.as_str(), hash_bytes(b)))
        .collect();
    compute_aggregate_hash(hashes.iter().map(|(p, h)| (*p, h.as_str())))
}

/// Entry metadata, stored as `meta.json` by [`FileCacheStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileMeta>,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// An entry with this key existed already; nothing was written.
    AlreadyExists,
}

/// Abstract storage for cache entries.
pub trait CacheStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    /// Metadata of every stored entry.
    fn list(&self) -> Result<Vec<CacheMeta>>;
    /// Store `entry` unless its key exists (first writer wins).
    fn put(&self, entry: CacheEntry) -> Result<SaveOutcome>;
}

/// Stores entries under `<root>/<blake3(key)>/`:
///
/// - `meta.json` with key, creation time, per-file hashes and digest
/// - `blobs/<file hash>` with the file contents
///
/// Entries are staged in a sibling directory and moved into place with a
/// single rename, so readers never observe a partial entry.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

const META_FILE: &str = "meta.json";
const BLOB_DIR: &str = "blobs";
const STAGING_PREFIX: &str = ".staging-";

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(hash_bytes(key.as_bytes()))
    }

    fn read_meta(&self, dir: &Path) -> Result<CacheMeta> {
        let text = self.fs.read_to_string(&dir.join(META_FILE))?;
        serde_json::from_str(&text).with_context(|| format!("parsing cache metadata in {:?}", dir))
    }

    fn write_entry(&self, dir: &Path, entry: &CacheEntry) -> Result<()> {
        let meta = entry.meta();
        for (fm, bytes) in meta.files.iter().zip(entry.files.values()) {
            let blob = dir.join(BLOB_DIR).join(&fm.hash);
            if !self.fs.exists(&blob) {
                self.fs.write(&blob, bytes)?;
            }
        }
        self.fs.create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(&meta).context("serialising cache metadata")?;
        self.fs.write(&dir.join(META_FILE), &json)?;
        Ok(())
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let dir = self.entry_dir(key);
        if !self.fs.is_dir(&dir) {
            return Ok(None);
        }
        let meta = self.read_meta(&dir)?;
        if meta.key != key {
            return Err(anyhow!(
                "cache directory {:?} holds key '{}', expected '{}'",
                dir,
                meta.key,
                key
            ));
        }

        let mut files = FileTree::new();
        for fm in meta.files {
            let bytes = self.fs.read(&dir.join(BLOB_DIR).join(&fm.hash))?;
            files.insert(fm.path, bytes);
        }

        Ok(Some(CacheEntry {
            key: meta.key,
            created_at: meta.created_at,
            files,
            digest: meta.digest,
        }))
    }

    fn list(&self) -> Result<Vec<CacheMeta>> {
        if !self.fs.is_dir(&self.root) {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for dir in self.fs.read_dir(&self.root)? {
            let staging = dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(STAGING_PREFIX));
            if staging || !self.fs.is_dir(&dir) {
                continue;
            }
            match self.read_meta(&dir) {
                Ok(meta) => metas.push(meta),
                Err(err) => warn!(dir = ?dir, error = %err, "skipping unreadable cache entry"),
            }
        }
        Ok(metas)
    }

    fn put(&self, entry: CacheEntry) -> Result<SaveOutcome> {
        let final_dir = self.entry_dir(&entry.key);
        if self.fs.exists(&final_dir) {
            debug!(key = %entry.key, "cache entry exists; not saving");
            return Ok(SaveOutcome::AlreadyExists);
        }

        let staging = self.root.join(format!(
            "{}{}",
            STAGING_PREFIX,
            uuid::Uuid::new_v4().simple()
        ));
        self.write_entry(&staging, &entry)
            .with_context(|| format!("staging cache entry '{}'", entry.key))?;

        match self.fs.rename(&staging, &final_dir) {
            Ok(()) => {
                info!(key = %entry.key, files = entry.files.len(), "saved cache entry");
                Ok(SaveOutcome::Saved)
            }
            Err(err) => {
                let _ = self.fs.remove_dir_all(&staging);
                if self.fs.exists(&final_dir) {
                    debug!(key = %entry.key, "lost save race; keeping first writer");
                    Ok(SaveOutcome::AlreadyExists)
                } else {
                    Err(err.context(format!("committing cache entry '{}'", entry.key)))
                }
            }
        }
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("cache store mutex poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn list(&self) -> Result<Vec<CacheMeta>> {
        let map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("cache store mutex poisoned"))?;
        Ok(map.values().map(CacheEntry::meta).collect())
    }

    fn put(&self, entry: CacheEntry) -> Result<SaveOutcome> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("cache store mutex poisoned"))?;
        if map.contains_key(&entry.key) {
            return Ok(SaveOutcome::AlreadyExists);
        }
        map.insert(entry.key.clone(), entry);
        Ok(SaveOutcome::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::fs::RealFileSystem;

    fn tree(pairs: &[(&str, &str)]) -> FileTree {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn file_store_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache"), Arc::new(RealFileSystem));

        let files = tree(&[(".venv/bin/python", "#!py"), ("/abs/outside.txt", "x")]);
        let entry = CacheEntry::new("pip-v1-abc", files.clone());
        assert_eq!(store.put(entry.clone()).unwrap(), SaveOutcome::Saved);

        let loaded = store.get("pip-v1-abc").unwrap().unwrap();
        assert_eq!(loaded.files, files);
        assert!(loaded.verify());
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.get("pip-v1-other").unwrap().is_none());
    }

    #[test]
    fn second_put_keeps_first_writer() {
        let fs = Arc::new(MockFileSystem::new());
        let store = FileCacheStore::new("/cache", fs);

        let first = CacheEntry::new("k", tree(&[("a", "first")]));
        let second = CacheEntry::new("k", tree(&[("a", "second")]));
        assert_eq!(store.put(first).unwrap(), SaveOutcome::Saved);
        assert_eq!(store.put(second).unwrap(), SaveOutcome::AlreadyExists);

        let got = store.get("k").unwrap().unwrap();
        assert_eq!(got.files["a"], b"first");
    }

    #[test]
    fn tampered_blob_fails_verification() {
        let fs = Arc::new(MockFileSystem::new());
        let store = FileCacheStore::new("/cache", fs.clone());
        let entry = CacheEntry::new("k", tree(&[("a", "good")]));
        let meta = entry.meta();
        store.put(entry).unwrap();

        let blob = store
            .entry_dir("k")
            .join(BLOB_DIR)
            .join(&meta.files[0].hash);
        fs.add_file(&blob, "evil");

        let got = store.get("k").unwrap().unwrap();
        assert!(!got.verify());
    }

    #[test]
    fn memory_store_first_writer_wins() {
        let store = MemoryCacheStore::new();
        store.put(CacheEntry::new("k", tree(&[("a", "1")]))).unwrap();
        let again = store.put(CacheEntry::new("k", tree(&[("a", "2")]))).unwrap();
        assert_eq!(again, SaveOutcome::AlreadyExists);
        assert_eq!(store.get("k").unwrap().unwrap().files["a"], b"1");
        assert_eq!(store.len(), 1);
    }
}
