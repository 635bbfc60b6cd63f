#![allow(clippy::result_large_err)]

use crate::core::config::Configuration;
use crate::core::environment::Environment;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the persisted index inside a batch root.
pub const INDEX_FILE: &str = "meltsBatchConfig.json";

/// One indexed job: `[name, configuration, environment]` on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry(pub String, pub Configuration, pub Environment);

impl IndexEntry {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn config(&self) -> &Configuration {
        &self.1
    }

    pub fn environment(&self) -> &Environment {
        &self.2
    }
}

/// Jobs of one batch keyed by configuration hash, in expansion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchIndex {
    entries: IndexMap<String, IndexEntry>,
}

impl BatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `hash`, returning the previous one.
    pub fn insert(
        &mut self,
        hash: String,
        name: String,
        config: Configuration,
        environment: Environment,
    ) -> Option<IndexEntry> {
        self.entries
            .insert(hash, IndexEntry(name, config, environment))
    }

    pub fn get(&self, hash: &str) -> Option<&IndexEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Resolve a batch root or an index file path to the index file.
    pub fn index_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(INDEX_FILE)
        } else {
            path.to_path_buf()
        }
    }

    /// Write the whole index to `<dir>/meltsBatchConfig.json`, creating the
    /// directory if needed. Returns the written path.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, AppError> {
        fs::create_dir_all(dir).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to create batch root {}: {}", dir.display(), err),
            )
        })?;
        let target = dir.join(INDEX_FILE);
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&target, data).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to write {}: {}", target.display(), err),
            )
            .with_code("IDX-001")
        })?;
        Ok(target)
    }

    /// Load an index written by [`BatchIndex::persist`] from a batch root or
    /// the index file itself.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let target = Self::index_path(path);
        let content = fs::read_to_string(&target).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", target.display(), err),
            )
            .with_code("IDX-002")
        })?;
        serde_json::from_str(&content).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("invalid batch index {}: {}", target.display(), err),
            )
            .with_code("IDX-003")
        })
    }
}

impl<'a> IntoIterator for &'a BatchIndex {
    type Item = (&'a String, &'a IndexEntry);
    type IntoIter = indexmap::map::Iter<'a, String, IndexEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
