// src/fs/glob.rs

//! Glob matching over workspace-relative paths and git ref names.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::fs::FileSystem;

/// Compile patterns into a `GlobSet`.
///
/// `*` never crosses a `/`; use `**` for that.
pub fn build_globset<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let pat = pat.as_ref();
        let glob = GlobBuilder::new(pat)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Include/exclude matcher for workspace-relative, `/`-separated paths.
///
/// Patterns starting with `!` are exclusions.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    include: GlobSet,
    exclude: Option<GlobSet>,
}

impl PathMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for p in patterns {
            let p = p.as_ref().trim();
            if p.is_empty() {
                continue;
            }
            match p.strip_prefix('!') {
                Some(rest) => exclude.push(rest.to_string()),
                None => include.push(p.to_string()),
            }
        }

        let include = build_globset(&include).context("building include globset")?;
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(&exclude).context("building exclude globset")?)
        };

        Ok(Self { include, exclude })
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.include.is_match(rel_path) {
            return false;
        }
        match &self.exclude {
            Some(ex) => !ex.is_match(rel_path),
            None => true,
        }
    }
}

/// Relative `/`-separated form of `path` under `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

/// Collect all files under `root` accepted by `matcher`, sorted by
/// relative path.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    matcher: &PathMatcher,
) -> Result<Vec<PathBuf>> {
    collect_matching_files_skipping(fs, root, matcher, &[])
}

/// Like [`collect_matching_files`], but never descends into `skip`
/// directories (e.g. ciflow's own cache, artifact and run directories).
pub fn collect_matching_files_skipping(
    fs: &dyn FileSystem,
    root: &Path,
    matcher: &PathMatcher,
    skip: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !fs.is_dir(root) || is_skipped(root, skip) {
        return Ok(files);
    }
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            if fs.is_dir(&path) {
                if !is_skipped(&path, skip) {
                    stack.push(path);
                }
            } else if fs.is_file(&path) {
                if let Some(rel) = relative_str(root, &path) {
                    if matcher.matches(&rel) {
                        files.push(path);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_skipped(path: &Path, skip: &[PathBuf]) -> bool {
    skip.iter().any(|dir| path.starts_with(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn star_does_not_cross_directories() {
        let set = build_globset(&["release/*"]).unwrap();
        assert!(set.is_match("release/1.0"));
        assert!(!set.is_match("release/1.0/hotfix"));

        let deep = build_globset(&["release/**"]).unwrap();
        assert!(deep.is_match("release/1.0/hotfix"));
    }

    #[test]
    fn collects_with_exclusions() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/requirements.txt", "flask");
        fs.add_file("/ws/sub/requirements.txt", "pytest");
        fs.add_file("/ws/vendor/requirements.txt", "ignored");
        fs.add_file("/ws/README.md", "docs");

        let matcher =
            PathMatcher::new(&["**/requirements.txt", "!vendor/**"]).unwrap();
        let files = collect_matching_files(&fs, Path::new("/ws"), &matcher).unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("/ws/requirements.txt"),
                PathBuf::from("/ws/sub/requirements.txt"),
            ]
        );
    }

    #[test]
    fn skipped_directories_are_not_walked() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/package.json", "{}");
        fs.add_file("/ws/.ciflow/runs/last-run.json", "{}");
        fs.add_file("/ws/.ciflow/cache/ab/meta.json", "{}");

        let matcher = PathMatcher::new(&["**/*.json"]).unwrap();
        let skip = vec![
            PathBuf::from("/ws/.ciflow/runs"),
            PathBuf::from("/ws/.ciflow/cache"),
        ];
        let files =
            collect_matching_files_skipping(&fs, Path::new("/ws"), &matcher, &skip).unwrap();

        assert_eq!(files, vec![PathBuf::from("/ws/package.json")]);
    }
}
