// src/secrets.rs

//! Secret values: where they come from and how they are hidden.
//!
//! Secrets are read from `CIFLOW_SECRET_<NAME>` environment variables and
//! from an optional dotenv-style file. They are exposed to expressions as
//! `secrets.<NAME>` and replaced by `***` in every captured line.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::errors::Result;

/// Prefix of environment variables holding secrets.
pub const SECRET_ENV_PREFIX: &str = "CIFLOW_SECRET_";

const MASK: &str = "***";

#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    values: BTreeMap<String, String>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Collect `CIFLOW_SECRET_<NAME>` variables from `vars`.
    pub fn from_env_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut store = Self::new();
        for (k, v) in vars {
            if let Some(name) = k.strip_prefix(SECRET_ENV_PREFIX) {
                if !name.is_empty() {
                    store.insert(name, v);
                }
            }
        }
        store
    }

    /// Secrets from the process environment.
    pub fn from_process_env() -> Self {
        Self::from_env_vars(std::env::vars())
    }

    /// Merge a dotenv-style file (`NAME=value` lines). File entries win over
    /// environment variables of the same name.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let iter = dotenvy::from_path_iter(path)
            .with_context(|| format!("opening secrets file {:?}", path))?;
        let mut count = 0usize;
        for item in iter {
            let (k, v) = item.with_context(|| format!("parsing secrets file {:?}", path))?;
            self.insert(k, v);
            count += 1;
        }
        debug!(path = ?path, count, "loaded secrets file");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The `secrets` expression namespace.
    pub fn to_json(&self) -> Json {
        let map: Map<String, Json> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect();
        Json::Object(map)
    }

    /// Replace every secret value occurring in `text` by `***`.
    ///
    /// Longer values are replaced first so that a secret containing another
    /// one is hidden completely.
    pub fn mask(&self, text: &str) -> String {
        let mut values: Vec<&str> = self
            .values
            .values()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return text.to_string();
        }
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut out = text.to_string();
        for v in values {
            if out.contains(v) {
                out = out.replace(v, MASK);
            }
        }
        out
    }
}
