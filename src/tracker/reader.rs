//! Read-side API on a separate connection.
//!
//! Every call runs in its own read transaction, so it sees one committed
//! snapshot and never a half-applied hint.

#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::core::errors::Result;
use crate::core::paths;
use crate::store::attached::{AttachedDataRecord, AttachedDataStore};
use crate::store::database::IndexDatabase;
use crate::store::entries::{EntryStore, TrackedEntry};

/// Row counts for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub entries: u64,
    pub observed: u64,
    pub inferred: u64,
    pub attached: u64,
    pub schema_version: i64,
}

pub struct TrackerReader {
    db: IndexDatabase,
}

impl TrackerReader {
    /// Open an existing index read-only; `MissingIndex` if there is none.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self {
            db: IndexDatabase::open_read_only(path, busy_timeout)?,
        })
    }

    pub fn entry(&mut self, path: &str) -> Result<Option<TrackedEntry>> {
        paths::validate_path(path)?;
        let tx = self.db.read_transaction()?;
        let entry = EntryStore::new(&tx).select_by_path(path)?;
        tx.finish()?;
        Ok(entry)
    }

    /// Direct children of `path`; empty if the path is untracked.
    pub fn children(&mut self, path: &str) -> Result<Vec<TrackedEntry>> {
        paths::validate_path(path)?;
        let tx = self.db.read_transaction()?;
        let store = EntryStore::new(&tx);
        let children = match store.select_by_path(path)? {
            Some(dir) => store.select_by_parent(dir.id)?,
            None => Vec::new(),
        };
        tx.finish()?;
        Ok(children)
    }

    /// `path` itself (if tracked) followed by all its descendants, by path.
    pub fn subtree(&mut self, path: &str) -> Result<Vec<TrackedEntry>> {
        paths::validate_path(path)?;
        let tx = self.db.read_transaction()?;
        let store = EntryStore::new(&tx);
        let mut rows: Vec<TrackedEntry> = store.select_by_path(path)?.into_iter().collect();
        if !rows.is_empty() {
            // The root's prefix range also matches the root row.
            let below = store.select_by_path_prefix(&paths::descendant_prefix(path))?;
            rows.extend(below.into_iter().filter(|e| e.path != path));
        }
        tx.finish()?;
        Ok(rows)
    }

    /// Attached records of the entry at `path`, by key.
    pub fn attached(&mut self, path: &str) -> Result<Vec<AttachedDataRecord>> {
        paths::validate_path(path)?;
        let tx = self.db.read_transaction()?;
        let records = match EntryStore::new(&tx).select_by_path(path)? {
            Some(entry) => AttachedDataStore::new(&tx).select_for_entry(entry.id)?,
            None => Vec::new(),
        };
        tx.finish()?;
        Ok(records)
    }

    pub fn summary(&mut self) -> Result<IndexSummary> {
        let schema_version = self.db.schema_version()?;
        let tx = self.db.read_transaction()?;
        let entries = EntryStore::new(&tx);
        let total = entries.count()?;
        let observed = entries.count_observed()?;
        let attached = AttachedDataStore::new(&tx).count()?;
        tx.finish()?;
        Ok(IndexSummary {
            entries: total,
            observed,
            inferred: total.saturating_sub(observed),
            attached,
            schema_version,
        })
    }
}
