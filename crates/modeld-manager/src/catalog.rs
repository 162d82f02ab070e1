//! Model artifact discovery
//!
//! The catalog is built once at startup by scanning the configured models
//! directory for `*.gguf` artifacts. It never rescans: ids resolve against
//! the set discovered at boot, and an id outside that set can never become an
//! instance.

use std::collections::HashMap;
use std::path::Path;

use modeld_core::{ModelEntry, ModeldError, Result};
use tracing::info;

/// Artifact extension recognized by the scan.
const MODEL_EXTENSION: &str = "gguf";

/// Immutable mapping of model ids to artifact paths.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
    by_id: HashMap<String, usize>,
}

impl ModelCatalog {
    /// Scan `dir` for model artifacts.
    ///
    /// Entries are ordered by file name so that `list()` is stable across
    /// runs. A missing or unreadable directory is a startup error.
    pub fn scan(dir: &Path) -> Result<Self> {
        let read = std::fs::read_dir(dir).map_err(|e| {
            ModeldError::config(format!("models dir {}: {e}", dir.display()))
        })?;

        let mut entries = Vec::new();
        for item in read {
            let item = item?;
            let path = item.path();
            if !path.is_file() {
                continue;
            }
            let is_model = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(MODEL_EXTENSION));
            if !is_model {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            entries.push(ModelEntry::new(id, path.clone()));
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        info!(dir = %dir.display(), models = entries.len(), "model catalog built");
        Ok(Self { entries, by_id })
    }

    /// Build a catalog from known entries (tests, preconfigured setups).
    pub fn from_entries(entries: Vec<ModelEntry>) -> Self {
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        Self { entries, by_id }
    }

    pub fn lookup(&self, id: &str) -> Option<&ModelEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// All entries in stable (file name) order.
    pub fn list(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
