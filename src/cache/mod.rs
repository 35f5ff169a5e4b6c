// src/cache/mod.rs

//! Content-addressed caches.
//!
//! - [`key`] derives keys from input file hashes.
//! - [`store`] persists entries ([`FileCacheStore`], [`MemoryCacheStore`]).
//! - [`CacheManager`] implements restore (exact key, then the longest
//!   matching restore-key prefix) and first-writer-wins saves.

pub mod key;
pub mod store;

pub use key::{derive_key, CacheKeySpec};
pub use store::{CacheEntry, CacheMeta, CacheStore, FileCacheStore, MemoryCacheStore, SaveOutcome};

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::fs::FileTree;

/// Result of a cache restore.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// The requested key itself.
    Exact(CacheEntry),
    /// An older entry found through a restore-key prefix.
    Partial(CacheEntry),
    Miss,
}

impl CacheLookup {
    pub fn is_exact(&self) -> bool {
        matches!(self, CacheLookup::Exact(_))
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            CacheLookup::Exact(e) | CacheLookup::Partial(e) => Some(e),
            CacheLookup::Miss => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Look up `key`, falling back to `restore_keys` prefixes.
    ///
    /// Among entries matching a prefix, the longest matching prefix wins and
    /// the newest entry breaks ties. Store errors and corrupted entries are
    /// logged and treated as a miss.
    pub fn restore(&self, key: &str, restore_keys: &[String]) -> CacheLookup {
        match self.store.get(key) {
            Ok(Some(entry)) if entry.verify() => {
                info!(key = %key, "cache hit");
                return CacheLookup::Exact(entry);
            }
            Ok(Some(_)) => {
                warn!(key = %key, "cache entry failed digest verification; ignoring");
            }
            Ok(None) => debug!(key = %key, "no exact cache entry"),
            Err(err) => {
                warn!(key = %key, error = %err, "cache store error during restore; treating as miss");
                return CacheLookup::Miss;
            }
        }

        if restore_keys.is_empty() {
            return CacheLookup::Miss;
        }

        match self.best_prefix_match(key, restore_keys) {
            Ok(Some(entry)) => {
                info!(key = %key, matched = %entry.key, "partial cache hit via restore key");
                CacheLookup::Partial(entry)
            }
            Ok(None) => {
                info!(key = %key, "cache miss");
                CacheLookup::Miss
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache store error during restore; treating as miss");
                CacheLookup::Miss
            }
        }
    }

    fn best_prefix_match(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheEntry>> {
        let mut candidates: Vec<(usize, CacheMeta)> = self
            .store
            .list()?
            .into_iter()
            .filter(|m| m.key != key)
            .filter_map(|m| {
                restore_keys
                    .iter()
                    .filter(|p| !p.is_empty() && m.key.starts_with(p.as_str()))
                    .map(|p| p.len())
                    .max()
                    .map(|len| (len, m))
            })
            .collect();

        // Longest prefix first, newest first on ties.
        candidates.sort_by(|(la, a), (lb, b)| lb.cmp(la).then(b.created_at.cmp(&a.created_at)));

        for (_, meta) in candidates {
            match self.store.get(&meta.key)? {
                Some(entry) if entry.verify() => return Ok(Some(entry)),
                Some(_) => warn!(key = %meta.key, "cache entry failed digest verification; skipping"),
                None => {}
            }
        }
        Ok(None)
    }

    /// Save `files` under `key`; a no-op when the key already exists.
    pub fn save(&self, key: &str, files: FileTree) -> Result<SaveOutcome> {
        self.store.put(CacheEntry::new(key, files))
    }
}
