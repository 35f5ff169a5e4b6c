// tests/cache_behaviour.rs

mod common;
use crate::common::{init_tracing, write_file};

use std::path::Path;
use std::sync::Arc;

use ciflow::cache::{derive_key, CacheKeySpec, CacheLookup, CacheManager, FileCacheStore, SaveOutcome};
use ciflow::fs::{restore_files, snapshot_files, FileSystem, RealFileSystem};

fn pip_key(fs: &dyn FileSystem, workspace: &Path) -> String {
    let spec = CacheKeySpec {
        prefix: "pip".to_string(),
        version: "1".to_string(),
        files: vec!["requirements.txt".to_string()],
    };
    derive_key(fs, workspace, &spec, &[]).unwrap()
}

#[test]
fn save_then_restore_is_byte_identical() {
    init_tracing();
    let ws = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cache = CacheManager::new(Arc::new(FileCacheStore::new(store_dir.path(), fs.clone())));

    write_file(ws.path(), "requirements.txt", "flask==3.0\n");
    write_file(ws.path(), ".venv/lib/flask.py", "print('flask')\n");
    let binary: Vec<u8> = (0u8..=255).collect();
    std::fs::create_dir_all(ws.path().join(".venv/bin")).unwrap();
    std::fs::write(ws.path().join(".venv/bin/python"), &binary).unwrap();

    let key = pip_key(fs.as_ref(), ws.path());
    let tree = snapshot_files(fs.as_ref(), ws.path(), &[".venv"]).unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(cache.save(&key, tree).unwrap(), SaveOutcome::Saved);

    let fresh = tempfile::tempdir().unwrap();
    let lookup = cache.restore(&key, &[]);
    assert!(lookup.is_exact());
    restore_files(fs.as_ref(), fresh.path(), &lookup.entry().unwrap().files).unwrap();

    assert_eq!(std::fs::read(fresh.path().join(".venv/bin/python")).unwrap(), binary);
    assert_eq!(
        std::fs::read_to_string(fresh.path().join(".venv/lib/flask.py")).unwrap(),
        "print('flask')\n"
    );
}

#[test]
fn changed_inputs_fall_back_to_restore_keys() {
    init_tracing();
    let ws = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cache = CacheManager::new(Arc::new(FileCacheStore::new(store_dir.path(), fs.clone())));

    write_file(ws.path(), "requirements.txt", "flask==3.0\n");
    write_file(ws.path(), ".venv/lib/flask.py", "old");
    let old_key = pip_key(fs.as_ref(), ws.path());
    let tree = snapshot_files(fs.as_ref(), ws.path(), &[".venv"]).unwrap();
    cache.save(&old_key, tree).unwrap();

    write_file(ws.path(), "requirements.txt", "flask==3.1\n");
    let new_key = pip_key(fs.as_ref(), ws.path());
    assert_ne!(old_key, new_key);
    assert!(new_key.starts_with("pip-v1-"));

    match cache.restore(&new_key, &["pip-v1-".to_string(), "pip-".to_string()]) {
        CacheLookup::Partial(entry) => assert_eq!(entry.key, old_key),
        other => panic!("expected a partial hit, got {other:?}"),
    }

    assert!(matches!(
        cache.restore(&new_key, &["npm-".to_string()]),
        CacheLookup::Miss
    ));
}

#[test]
fn second_save_keeps_the_first_entry() {
    init_tracing();
    let ws = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cache = CacheManager::new(Arc::new(FileCacheStore::new(store_dir.path(), fs.clone())));

    write_file(ws.path(), "out/data.bin", "first");
    let first = snapshot_files(fs.as_ref(), ws.path(), &["out"]).unwrap();
    assert_eq!(cache.save("build-v1-abc", first).unwrap(), SaveOutcome::Saved);

    write_file(ws.path(), "out/data.bin", "second");
    let second = snapshot_files(fs.as_ref(), ws.path(), &["out"]).unwrap();
    assert_eq!(
        cache.save("build-v1-abc", second).unwrap(),
        SaveOutcome::AlreadyExists
    );

    let entry = cache.restore("build-v1-abc", &[]).entry().cloned().unwrap();
    assert_eq!(entry.files["out/data.bin"], b"first".to_vec());
}

#[test]
fn entries_survive_a_new_store_instance() {
    init_tracing();
    let store_dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let mut tree = ciflow::fs::FileTree::new();
    tree.insert("a.txt".to_string(), b"persisted".to_vec());
    CacheManager::new(Arc::new(FileCacheStore::new(store_dir.path(), fs.clone())))
        .save("k-v1-1", tree)
        .unwrap();

    let reopened = CacheManager::new(Arc::new(FileCacheStore::new(store_dir.path(), fs)));
    assert!(reopened.restore("k-v1-1", &[]).is_exact());
}
