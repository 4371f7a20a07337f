use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::store;
use crate::types::WatcherSpec;

/// Durable, ordered list of watchers backed by a JSON array file.
///
/// Cheap to clone; every clone points at the same file. The poll loop reads it
/// once per cycle while an external command path may append at any time.
#[derive(Debug, Clone)]
pub struct WatcherRegistry {
    path: PathBuf,
}

impl WatcherRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All watchers in insertion order. A missing file is an empty registry.
    pub fn list(&self) -> Result<Vec<WatcherSpec>> {
        store::read_json_or_default(&self.path)
    }

    /// Read-modify-write append. The rewrite is all-or-nothing for readers.
    pub fn append(&self, spec: WatcherSpec) -> Result<()> {
        let mut watchers = self.list()?;
        info!(
            url = %spec.source_url,
            currencies = ?spec.accepted_currencies,
            "Adding watcher"
        );
        watchers.push(spec);
        store::write_json_atomic(&self.path, &watchers, true)
    }
}
