//! Change events produced by reconciliation.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::store::attached::AttachedDataRecord;
use crate::store::entries::TrackedEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Changed => "changed",
            Self::Deleted => "deleted",
        }
    }
}

/// An attached record as seen by one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedSnapshot {
    pub record: AttachedDataRecord,
    /// The record no longer exists after the event's transaction.
    pub removed: bool,
}

/// One observable change to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Entry state after the change (before it, for `Deleted`).
    pub entry: TrackedEntry,
    pub attached: Vec<AttachedSnapshot>,
}

impl ChangeEvent {
    pub(crate) fn created(entry: TrackedEntry, attached: Vec<AttachedDataRecord>) -> Self {
        Self {
            kind: ChangeKind::Created,
            entry,
            attached: attached
                .into_iter()
                .map(|record| AttachedSnapshot {
                    record,
                    removed: false,
                })
                .collect(),
        }
    }

    pub(crate) fn changed(entry: TrackedEntry, attached: Vec<AttachedSnapshot>) -> Self {
        Self {
            kind: ChangeKind::Changed,
            entry,
            attached,
        }
    }

    pub(crate) fn deleted(entry: TrackedEntry, attached: Vec<AttachedDataRecord>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            entry,
            attached: attached
                .into_iter()
                .map(|record| AttachedSnapshot {
                    record,
                    removed: true,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.entry.path
    }

    /// Records that this event removed.
    pub fn removed_attached(&self) -> impl Iterator<Item = &AttachedDataRecord> {
        self.attached
            .iter()
            .filter(|snap| snap.removed)
            .map(|snap| &snap.record)
    }

    /// Records still present after this event.
    pub fn kept_attached(&self) -> impl Iterator<Item = &AttachedDataRecord> {
        self.attached
            .iter()
            .filter(|snap| !snap.removed)
            .map(|snap| &snap.record)
    }
}
