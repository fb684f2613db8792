//! Attached-data deletion policy, evaluated when an entry's content changes.

use crate::core::errors::Result;
use crate::store::attached::{AttachedDataRecord, AttachedDataStore, DeletionPolicy};
use crate::tracker::event::AttachedSnapshot;

/// Whether a record must go when its entry's content tag changes.
#[must_use]
pub fn deletes_on_content_change(record: &AttachedDataRecord) -> bool {
    record
        .policy
        .contains(DeletionPolicy::DELETE_ON_CONTENT_CHANGE)
}

/// Delete every record whose policy asks for it and report all of them.
///
/// Must run in the same transaction as the content-tag update that caused it.
pub fn apply_content_change(
    store: &AttachedDataStore<'_>,
    records: Vec<AttachedDataRecord>,
) -> Result<Vec<AttachedSnapshot>> {
    let mut snapshots = Vec::with_capacity(records.len());
    for record in records {
        let removed = if deletes_on_content_change(&record) {
            store.delete_by_id(record.id)?
        } else {
            false
        };
        snapshots.push(AttachedSnapshot { record, removed });
    }
    Ok(snapshots)
}
