// src/fs/snapshot.rs

//! Capture files into memory and write them back.
//!
//! Used by the cache and artifact stores, which both deal in
//! "relative path -> bytes" trees.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::fs::glob::{collect_matching_files_skipping, relative_str, PathMatcher};
use crate::fs::FileSystem;

/// Relative (`/`-separated) path -> file contents.
pub type FileTree = BTreeMap<String, Vec<u8>>;

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{', '!'])
}

/// Read the files named by `paths` into a [`FileTree`].
///
/// Each entry is resolved against `root` and may be a file, a directory
/// (taken recursively) or a glob pattern. Missing entries are skipped.
/// Keys are relative to `root` when the file lives under it, absolute
/// otherwise.
pub fn snapshot_files<S: AsRef<str>>(
    fs: &dyn FileSystem,
    root: &Path,
    paths: &[S],
) -> Result<FileTree> {
    snapshot_files_skipping(fs, root, paths, &[])
}

/// Like [`snapshot_files`], but directory walks never enter `skip`.
pub fn snapshot_files_skipping<S: AsRef<str>>(
    fs: &dyn FileSystem,
    root: &Path,
    paths: &[S],
    skip: &[PathBuf],
) -> Result<FileTree> {
    let mut tree = FileTree::new();

    let (globs, plain): (Vec<&str>, Vec<&str>) = paths
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .partition(|p| has_glob_meta(p));

    let mut files: Vec<PathBuf> = Vec::new();

    if globs.iter().any(|g| !g.starts_with('!')) {
        let matcher = PathMatcher::new(&globs)?;
        files.extend(collect_matching_files_skipping(fs, root, &matcher, skip)?);
    }

    let everything = PathMatcher::new(&["**"])?;
    for p in plain {
        let full = if p == "." { root.to_path_buf() } else { root.join(p) };
        if fs.is_file(&full) {
            files.push(full);
        } else if fs.is_dir(&full) {
            files.extend(collect_matching_files_skipping(fs, &full, &everything, skip)?);
        } else {
            debug!(path = %p, "snapshot path does not exist; skipping");
        }
    }

    for file in files {
        let key = relative_str(root, &file)
            .unwrap_or_else(|| file.to_string_lossy().replace('\\', "/"));
        if tree.contains_key(&key) {
            continue;
        }
        let bytes = fs.read(&file)?;
        tree.insert(key, bytes);
    }

    Ok(tree)
}

/// Write every file of `tree` below `root`, overwriting existing files.
///
/// Returns the number of files written.
pub fn restore_files(fs: &dyn FileSystem, root: &Path, tree: &FileTree) -> Result<usize> {
    for (rel, bytes) in tree {
        fs.write(&root.join(rel), bytes)?;
    }
    Ok(tree.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn snapshots_dirs_files_and_globs() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/.venv/bin/python", "py");
        fs.add_file("/ws/.venv/lib/site.py", "site");
        fs.add_file("/ws/dist/app-1.0.tar.gz", "tar");
        fs.add_file("/ws/dist/notes.txt", "n");
        fs.add_file("/ws/coverage.xml", "<xml/>");

        let tree = snapshot_files(
            &fs,
            Path::new("/ws"),
            &[".venv", "coverage.xml", "dist/*.tar.gz", "missing"],
        )
        .unwrap();

        let keys: Vec<&str> = tree.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                ".venv/bin/python",
                ".venv/lib/site.py",
                "coverage.xml",
                "dist/app-1.0.tar.gz"
            ]
        );
    }

    #[test]
    fn restore_writes_under_root() {
        let fs = MockFileSystem::new();
        let mut tree = FileTree::new();
        tree.insert("a/b.txt".to_string(), b"hello".to_vec());

        let n = restore_files(&fs, Path::new("/other"), &tree).unwrap();
        assert_eq!(n, 1);
        assert_eq!(fs.read(Path::new("/other/a/b.txt")).unwrap(), b"hello");
    }

    #[test]
    fn whole_workspace_snapshot_leaves_out_skipped_dirs() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/src/main.py", "print()");
        fs.add_file("/ws/.ciflow/artifacts/run-1/dist/manifest.json", "{}");

        let skip = vec![PathBuf::from("/ws/.ciflow/artifacts")];
        let tree = snapshot_files_skipping(&fs, Path::new("/ws"), &["."], &skip).unwrap();

        let keys: Vec<&str> = tree.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/main.py"]);
    }
}
