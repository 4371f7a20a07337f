use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::store;
use crate::types::ListingId;

/// On-disk record shape: `{"id": 123}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerRecord {
    id: ListingId,
}

/// Append-only set of listing ids that have already been processed.
///
/// Ids are never removed. Duplicate records are tolerated since lookups only
/// need any-match semantics.
#[derive(Debug, Clone)]
pub struct DedupLedger {
    path: PathBuf,
}

impl DedupLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<LedgerRecord>> {
        store::read_json_or_default(&self.path)
    }

    /// Whether `id` was recorded before. Fails open: a read error is logged
    /// and the id is treated as unseen.
    pub fn contains(&self, id: ListingId) -> bool {
        !self.seen_among(&[id]).is_empty()
    }

    /// The subset of `ids` already recorded, read with a single pass over the
    /// store. Fails open like [`DedupLedger::contains`].
    pub fn seen_among(&self, ids: &[ListingId]) -> HashSet<ListingId> {
        let records = match self.load() {
            Ok(records) => records,
            Err(e) => {
                warn!("Ledger unreadable, treating listings as unseen: {e}");
                return HashSet::new();
            }
        };
        let wanted: HashSet<ListingId> = ids.iter().copied().collect();
        records
            .into_iter()
            .map(|r| r.id)
            .filter(|id| wanted.contains(id))
            .collect()
    }

    /// Append `ids` and persist. An empty batch does not touch the store.
    ///
    /// An undecodable ledger is moved aside and a fresh one is started from
    /// `ids`, so a damaged file costs some duplicate forwards rather than
    /// stopping forwarding. A ledger that cannot be read or written at all is
    /// an error.
    pub fn record_batch(&self, ids: &[ListingId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut records = match self.load() {
            Ok(records) => records,
            Err(e) if e.is_corrupt_storage() => {
                let moved = store::quarantine(&self.path)?;
                error!(
                    ledger = %self.path.display(),
                    moved_to = %moved.display(),
                    "Ledger undecodable, starting a new one: {e}"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        records.extend(ids.iter().map(|&id| LedgerRecord { id }));
        store::write_json_atomic(&self.path, &records, false)?;
        debug!(added = ids.len(), total = records.len(), "Ledger updated");
        Ok(())
    }

    /// Number of stored records, duplicates included.
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
