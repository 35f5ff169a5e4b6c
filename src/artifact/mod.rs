// src/artifact/mod.rs

//! Named, immutable byte payloads passed between the jobs of one run.
//!
//! A job uploads a [`FileTree`] under a name; later jobs download it by
//! name. A second upload of the same name in a run is an error, and every
//! download is recorded on the artifact.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{CiflowError, Result};
use crate::fs::{FileSystem, FileTree};

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub files: FileTree,
    pub producer: String,
    pub consumers: BTreeSet<String>,
}

impl Artifact {
    pub fn size(&self) -> u64 {
        self.files.values().map(|b| b.len() as u64).sum()
    }
}

/// What is known about an artifact without its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    pub producer: String,
    #[serde(default)]
    pub consumers: BTreeSet<String>,
    pub files: Vec<String>,
    pub size: u64,
}

pub trait ArtifactStore: Send + Sync + Debug {
    /// Store `files` under `name`. Fails if `name` was already uploaded.
    fn upload(&self, name: &str, producer: &str, files: FileTree) -> Result<ArtifactManifest>;

    /// Fetch the artifact and record `consumer` on it.
    fn download(&self, name: &str, consumer: &str) -> Result<Artifact>;

    fn list(&self) -> Result<Vec<ArtifactManifest>>;
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|']);
    if bad {
        return Err(CiflowError::Artifact(format!("invalid artifact name '{}'", name)));
    }
    Ok(())
}

/// File keys must be relative paths that stay inside the artifact.
fn check_file_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let inside = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        return Err(CiflowError::Artifact(format!("invalid artifact file path '{}'", key)));
    }
    Ok(())
}

fn check_files(files: &FileTree) -> Result<()> {
    files.keys().try_for_each(|key| check_file_key(key))
}

/// In-memory store, shared by all jobs of a run.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<String, Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn manifest_of(a: &Artifact) -> ArtifactManifest {
    ArtifactManifest {
        name: a.name.clone(),
        producer: a.producer.clone(),
        consumers: a.consumers.clone(),
        files: a.files.keys().cloned().collect(),
        size: a.size(),
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn upload(&self, name: &str, producer: &str, files: FileTree) -> Result<ArtifactManifest> {
        check_name(name)?;
        check_files(&files)?;
        let mut guard = self
            .artifacts
            .lock()
            .map_err(|_| CiflowError::Artifact("artifact store lock poisoned".to_string()))?;
        if let Some(existing) = guard.get(name) {
            return Err(CiflowError::Artifact(format!(
                "artifact '{}' was already uploaded by job '{}'",
                name, existing.producer
            )));
        }
        let artifact = Artifact {
            name: name.to_string(),
            files,
            producer: producer.to_string(),
            consumers: BTreeSet::new(),
        };
        let manifest = manifest_of(&artifact);
        guard.insert(name.to_string(), artifact);
        Ok(manifest)
    }

    fn download(&self, name: &str, consumer: &str) -> Result<Artifact> {
        let mut guard = self
            .artifacts
            .lock()
            .map_err(|_| CiflowError::Artifact("artifact store lock poisoned".to_string()))?;
        let artifact = guard
            .get_mut(name)
            .ok_or_else(|| CiflowError::Artifact(format!("artifact '{}' not found", name)))?;
        artifact.consumers.insert(consumer.to_string());
        Ok(artifact.clone())
    }

    fn list(&self) -> Result<Vec<ArtifactManifest>> {
        let guard = self
            .artifacts
            .lock()
            .map_err(|_| CiflowError::Artifact("artifact store lock poisoned".to_string()))?;
        Ok(guard.values().map(manifest_of).collect())
    }
}

/// On-disk store for one run: `<root>/<run_id>/<name>/`.
///
/// Each artifact directory holds `manifest.json` and the files under
/// `files/`. Uploads are staged and renamed into place.
#[derive(Debug)]
pub struct FileArtifactStore {
    run_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    // Serialises manifest updates on download.
    lock: Mutex<()>,
}

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

impl FileArtifactStore {
    pub fn new(root: &Path, run_id: &str, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            run_dir: root.join(run_id),
            fs,
            lock: Mutex::new(()),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn read_manifest(&self, dir: &Path) -> Result<ArtifactManifest> {
        let text = self.fs.read_to_string(&dir.join(MANIFEST_FILE))?;
        serde_json::from_str(&text)
            .map_err(|e| CiflowError::Artifact(format!("corrupt manifest in {:?}: {}", dir, e)))
    }

    fn write_manifest(&self, dir: &Path, manifest: &ArtifactManifest) -> Result<()> {
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| CiflowError::Artifact(format!("serialising manifest: {}", e)))?;
        self.fs.write(&dir.join(MANIFEST_FILE), &json)?;
        Ok(())
    }
}

impl ArtifactStore for FileArtifactStore {
    fn upload(&self, name: &str, producer: &str, files: FileTree) -> Result<ArtifactManifest> {
        check_name(name)?;
        check_files(&files)?;
        let target = self.run_dir.join(name);
        if self.fs.exists(&target) {
            return Err(CiflowError::Artifact(format!(
                "artifact '{}' was already uploaded in this run",
                name
            )));
        }

        let staging = self
            .run_dir
            .join(format!(".staging-{}", uuid::Uuid::new_v4().simple()));
        for (rel, bytes) in &files {
            self.fs.write(&staging.join(FILES_DIR).join(rel), bytes)?;
        }
        let manifest = ArtifactManifest {
            name: name.to_string(),
            producer: producer.to_string(),
            consumers: BTreeSet::new(),
            files: files.keys().cloned().collect(),
            size: files.values().map(|b| b.len() as u64).sum(),
        };
        self.write_manifest(&staging, &manifest)?;

        if let Err(err) = self.fs.rename(&staging, &target) {
            let _ = self.fs.remove_dir_all(&staging);
            if self.fs.exists(&target) {
                return Err(CiflowError::Artifact(format!(
                    "artifact '{}' was already uploaded in this run",
                    name
                )));
            }
            return Err(CiflowError::Other(err));
        }

        info!(artifact = %name, job = %producer, files = manifest.files.len(), "artifact uploaded");
        Ok(manifest)
    }

    fn download(&self, name: &str, consumer: &str) -> Result<Artifact> {
        check_name(name)?;
        let dir = self.run_dir.join(name);
        if !self.fs.is_dir(&dir) {
            return Err(CiflowError::Artifact(format!("artifact '{}' not found", name)));
        }

        let _guard = self
            .lock
            .lock()
            .map_err(|_| CiflowError::Artifact("artifact store lock poisoned".to_string()))?;
        let mut manifest = self.read_manifest(&dir)?;

        let mut files = FileTree::new();
        for rel in &manifest.files {
            check_file_key(rel)?;
            let bytes = self.fs.read(&dir.join(FILES_DIR).join(rel))?;
            files.insert(rel.clone(), bytes);
        }

        if manifest.consumers.insert(consumer.to_string()) {
            self.write_manifest(&dir, &manifest)?;
        }
        debug!(artifact = %name, job = %consumer, "artifact downloaded");

        Ok(Artifact {
            name: manifest.name,
            files,
            producer: manifest.producer,
            consumers: manifest.consumers,
        })
    }

    fn list(&self) -> Result<Vec<ArtifactManifest>> {
        if !self.fs.is_dir(&self.run_dir) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for dir in self.fs.read_dir(&self.run_dir)? {
            let is_staging = dir
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(".staging-"))
                .unwrap_or(true);
            if is_staging || !self.fs.is_dir(&dir) {
                continue;
            }
            out.push(self.read_manifest(&dir)?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}
