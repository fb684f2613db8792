//! Reconciliation engine: turns one hint plus the committed index state into
//! entry mutations and change events.
//!
//! Everything here runs on the caller's transaction. The engine never commits;
//! on any error the caller drops the transaction and the collected events with it.
//!
//! Comparison of a stored entry against a new identity:
//!
//! | stored                         | result                      |
//! |--------------------------------|-----------------------------|
//! | directory flag differs         | delete subtree, insert      |
//! | inferred (no identifier)       | confirm in place, `Created` |
//! | identifier differs             | delete subtree, insert      |
//! | content differs                | update in place, `Changed`  |
//! | identical                      | nothing                     |

#![allow(missing_docs)]

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::core::errors::{Result, TrackerError};
use crate::core::paths;
use crate::store::attached::{AttachedDataRecord, AttachedDataStore, DeletionPolicy};
use crate::store::entries::{EntryStore, TrackedEntry};
use crate::tracker::event::ChangeEvent;
use crate::tracker::hint::{ChildHint, Hint, Identity};
use crate::tracker::policy;

/// How a stored entry relates to a newly observed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Replace,
    Confirm,
    ContentChanged,
    Unchanged,
}

/// Compare a stored entry with a new identity.
#[must_use]
pub fn compare(old: &TrackedEntry, new: &Identity) -> Comparison {
    if old.is_directory != new.is_directory {
        return Comparison::Replace;
    }
    match old.identifier_tag.as_deref() {
        None => Comparison::Confirm,
        Some(tag) if tag != new.identifier_tag => Comparison::Replace,
        Some(_) if old.content_tag.as_deref() != Some(new.content_tag.as_str()) => {
            Comparison::ContentChanged
        }
        Some(_) => Comparison::Unchanged,
    }
}

/// Extra result of a hint besides its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintOutcome {
    None,
    Attached(AttachedDataRecord),
    Detached(bool),
}

/// Everything one hint produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub events: Vec<ChangeEvent>,
    pub outcome: HintOutcome,
}

/// Reconcile one hint on `conn` (normally an open write transaction).
pub fn reconcile(conn: &Connection, hint: &Hint) -> Result<Reconciliation> {
    hint.validate()?;
    let mut engine = Reconciler::new(conn);
    let outcome = match hint {
        Hint::File { path, identity } => {
            engine.index_file(path, identity.as_ref())?;
            HintOutcome::None
        }
        Hint::Directory { path, children } => {
            engine.index_directory(path, children)?;
            HintOutcome::None
        }
        Hint::Deleted { path } => {
            engine.index_file(path, None)?;
            HintOutcome::None
        }
        Hint::AttachData {
            path,
            identity,
            key,
            payload,
            policy,
        } => HintOutcome::Attached(engine.attach_data(path, identity, key, payload, *policy)?),
        Hint::DetachData { path, key } => HintOutcome::Detached(engine.detach_data(path, key)?),
    };
    Ok(Reconciliation {
        events: engine.into_events(),
        outcome,
    })
}

/// Stateful engine for one transaction; accumulates events in order.
pub struct Reconciler<'c> {
    entries: EntryStore<'c>,
    attached: AttachedDataStore<'c>,
    events: Vec<ChangeEvent>,
}

/// In-place update queued during directory reconciliation.
struct PendingUpdate<'h> {
    old: TrackedEntry,
    new: &'h Identity,
    comparison: Comparison,
}

impl<'c> Reconciler<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            entries: EntryStore::new(conn),
            attached: AttachedDataStore::new(conn),
            events: Vec::new(),
        }
    }

    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }

    /// Bring one path in line with `identity` (`None` = gone).
    pub fn index_file(&mut self, path: &str, identity: Option<&Identity>) -> Result<()> {
        if paths::is_root(path) {
            return Ok(());
        }
        let Some(new) = identity else {
            return self.delete(path);
        };
        match self.entries.select_by_path(path)? {
            None => self.insert_observed(path, new),
            Some(old) => {
                let comparison = compare(&old, new);
                self.apply_comparison(old, new, comparison)
            }
        }
    }

    /// Make the children of `path` exactly `children`.
    pub fn index_directory(&mut self, path: &str, children: &[ChildHint]) -> Result<()> {
        let dir_id = self.ensure_directory(path)?;

        let mut listed: BTreeMap<String, &Identity> = BTreeMap::new();
        for child in children {
            if listed
                .insert(paths::join(path, &child.name), &child.identity)
                .is_some()
            {
                tracing::debug!(
                    dir = path,
                    name = %child.name,
                    "duplicate child in listing; last wins"
                );
            }
        }

        let mut removals: Vec<String> = Vec::new();
        let mut additions: Vec<(String, &Identity)> = Vec::new();
        let mut updates: Vec<PendingUpdate<'_>> = Vec::new();

        for old in self.entries.select_by_parent(dir_id)? {
            let Some(new) = listed.remove(&old.path) else {
                removals.push(old.path);
                continue;
            };
            match compare(&old, new) {
                Comparison::Replace => {
                    removals.push(old.path.clone());
                    additions.push((old.path, new));
                }
                Comparison::Unchanged => {}
                comparison => updates.push(PendingUpdate {
                    old,
                    new,
                    comparison,
                }),
            }
        }
        additions.extend(listed);
        additions.sort_by(|a, b| a.0.cmp(&b.0));

        // Removals first: a replaced child's new row reuses its path.
        for child_path in &removals {
            self.delete(child_path)?;
        }
        for (child_path, new) in additions {
            self.insert_with_parent(child_path, dir_id, new)?;
        }
        for update in updates {
            self.apply_comparison(update.old, update.new, update.comparison)?;
        }
        Ok(())
    }

    /// Remove `path` and everything under it.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        if paths::is_root(path) {
            return Ok(());
        }
        let Some(entry) = self.entries.select_by_path(path)? else {
            return Ok(());
        };

        let prefix = paths::descendant_prefix(path);
        let mut removed = vec![entry];
        removed.extend(self.entries.select_by_path_prefix(&prefix)?);
        let mut attached = self.attached.select_for_subtree(path)?;

        self.entries.delete_by_path_prefix(&prefix)?;
        self.entries.delete_by_path(path)?;

        for entry in removed {
            let records = attached.remove(&entry.id).unwrap_or_default();
            if entry.is_inferred() {
                continue;
            }
            self.events.push(ChangeEvent::deleted(entry, records));
        }
        Ok(())
    }

    /// Make sure `path` and all its ancestors exist as directories; return its id.
    pub fn ensure_directory(&mut self, path: &str) -> Result<i64> {
        if let Some(existing) = self.entries.select_by_path(path)?
            && existing.is_directory
        {
            return Ok(existing.id);
        }

        let mut parent_id: Option<i64> = None;
        for dir in paths::lineage(path) {
            let id = match self.entries.select_by_path(dir)? {
                Some(existing) if existing.is_directory => existing.id,
                Some(_) => {
                    self.delete(dir)?;
                    self.entries.insert(dir, parent_id, true, None, None)?
                }
                None => self.entries.insert(dir, parent_id, true, None, None)?,
            };
            parent_id = Some(id);
        }
        parent_id.ok_or_else(|| TrackerError::consistency(path, "directory lineage is empty"))
    }

    /// Make the entry current, then store the payload on it.
    pub fn attach_data(
        &mut self,
        path: &str,
        identity: &Identity,
        key: &str,
        payload: &[u8],
        policy: DeletionPolicy,
    ) -> Result<AttachedDataRecord> {
        self.index_file(path, Some(identity))?;
        match self.entries.select_by_path(path)? {
            Some(entry) if !entry.is_inferred() => {
                self.attached.upsert(entry.id, key, payload, policy)
            }
            _ => Err(TrackerError::NoIdentity {
                path: path.to_string(),
            }),
        }
    }

    /// Remove one attached record; `false` if there was nothing to remove.
    pub fn detach_data(&mut self, path: &str, key: &str) -> Result<bool> {
        match self.entries.select_by_path(path)? {
            Some(entry) => self.attached.delete_by_key(entry.id, key),
            None => Ok(false),
        }
    }

    // ──────────────────── internals ────────────────────

    fn apply_comparison(
        &mut self,
        old: TrackedEntry,
        new: &Identity,
        comparison: Comparison,
    ) -> Result<()> {
        match comparison {
            Comparison::Replace => {
                self.delete(&old.path)?;
                self.insert_observed(&old.path, new)
            }
            Comparison::Confirm => {
                self.entries.update_identifier_and_content_tag(
                    old.id,
                    Some(&new.identifier_tag),
                    Some(&new.content_tag),
                )?;
                let records = self.attached.select_for_entry(old.id)?;
                let entry = TrackedEntry {
                    identifier_tag: Some(new.identifier_tag.clone()),
                    content_tag: Some(new.content_tag.clone()),
                    ..old
                };
                self.events.push(ChangeEvent::created(entry, records));
                Ok(())
            }
            Comparison::ContentChanged => {
                self.entries.update_content_tag(old.id, Some(&new.content_tag))?;
                let records = self.attached.select_for_entry(old.id)?;
                let snapshots = policy::apply_content_change(&self.attached, records)?;
                let entry = TrackedEntry {
                    content_tag: Some(new.content_tag.clone()),
                    ..old
                };
                self.events.push(ChangeEvent::changed(entry, snapshots));
                Ok(())
            }
            Comparison::Unchanged => Ok(()),
        }
    }

    fn insert_observed(&mut self, path: &str, new: &Identity) -> Result<()> {
        let parent = paths::parent_of(path)
            .ok_or_else(|| TrackerError::consistency(path, "observed path has no parent"))?;
        let parent_id = self.ensure_directory(parent)?;
        self.insert_with_parent(path.to_string(), parent_id, new)
    }

    fn insert_with_parent(&mut self, path: String, parent_id: i64, new: &Identity) -> Result<()> {
        let id = self.entries.insert(
            &path,
            Some(parent_id),
            new.is_directory,
            Some(&new.identifier_tag),
            Some(&new.content_tag),
        )?;
        let entry = TrackedEntry {
            id,
            path,
            parent_id: Some(parent_id),
            is_directory: new.is_directory,
            identifier_tag: Some(new.identifier_tag.clone()),
            content_tag: Some(new.content_tag.clone()),
        };
        self.events.push(ChangeEvent::created(entry, Vec::new()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::database::IndexDatabase;
    use crate::tracker::event::ChangeKind;

    fn apply(db: &mut IndexDatabase, hint: Hint) -> Reconciliation {
        let tx = db.write_transaction().unwrap();
        let result = reconcile(&tx, &hint).unwrap();
        tx.commit().unwrap();
        result
    }

    fn summary(events: &[ChangeEvent]) -> Vec<(ChangeKind, String)> {
        events
            .iter()
            .map(|e| (e.kind, e.entry.path.clone()))
            .collect()
    }

    fn entry(db: &IndexDatabase, path: &str) -> Option<TrackedEntry> {
        EntryStore::new(db.connection()).select_by_path(path).unwrap()
    }

    fn child_paths(db: &IndexDatabase, path: &str) -> Vec<String> {
        let store = EntryStore::new(db.connection());
        let dir = store.select_by_path(path).unwrap().unwrap();
        store
            .select_by_parent(dir.id)
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect()
    }

    fn file(id: &str, content: &str) -> Identity {
        Identity::file(id, content)
    }

    fn dir(id: &str, content: &str) -> Identity {
        Identity::directory(id, content)
    }

    #[test]
    fn deep_file_creates_silent_ancestors() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        let result = apply(&mut db, Hint::file("/a/b/c", file("1", "1")));

        assert_eq!(
            summary(&result.events),
            vec![(ChangeKind::Created, "/a/b/c".to_string())]
        );
        let a = entry(&db, "/a").unwrap();
        let b = entry(&db, "/a/b").unwrap();
        let c = entry(&db, "/a/b/c").unwrap();
        assert!(a.is_directory && a.is_inferred());
        assert!(b.is_directory && b.is_inferred());
        assert_eq!(b.parent_id, Some(a.id));
        assert_eq!(c.parent_id, Some(b.id));
        assert!(!c.is_directory);
        assert!(entry(&db, "/").unwrap().parent_id.is_none());
    }

    #[test]
    fn identical_hint_is_idempotent() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/f", file("1", "1")));
        let before = entry(&db, "/f").unwrap();

        let result = apply(&mut db, Hint::file("/f", file("1", "1")));
        assert!(result.events.is_empty());
        assert_eq!(entry(&db, "/f").unwrap(), before);
    }

    #[test]
    fn identifier_change_replaces() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/f", file("1", "1")));
        let old_id = entry(&db, "/f").unwrap().id;

        let result = apply(&mut db, Hint::file("/f", file("2", "1")));
        assert_eq!(
            summary(&result.events),
            vec![
                (ChangeKind::Deleted, "/f".to_string()),
                (ChangeKind::Created, "/f".to_string())
            ]
        );
        assert_ne!(entry(&db, "/f").unwrap().id, old_id);
    }

    #[test]
    fn content_change_updates_in_place_and_applies_policy() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        let id = file("1", "1");
        apply(
            &mut db,
            Hint::AttachData {
                path: "/f".to_string(),
                identity: id.clone(),
                key: "thumb".to_string(),
                payload: b"png".to_vec(),
                policy: DeletionPolicy::DELETE_ON_CONTENT_CHANGE,
            },
        );
        apply(
            &mut db,
            Hint::AttachData {
                path: "/f".to_string(),
                identity: id,
                key: "note".to_string(),
                payload: b"keep".to_vec(),
                policy: DeletionPolicy::NONE,
            },
        );
        let before = entry(&db, "/f").unwrap();

        let result = apply(&mut db, Hint::file("/f", file("1", "2")));
        assert_eq!(result.events.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.kind, ChangeKind::Changed);
        assert_eq!(event.entry.id, before.id);
        assert_eq!(event.entry.content_tag.as_deref(), Some("2"));
        let removed: Vec<&str> = event.removed_attached().map(|r| r.key.as_str()).collect();
        let kept: Vec<&str> = event.kept_attached().map(|r| r.key.as_str()).collect();
        assert_eq!(removed, vec!["thumb"]);
        assert_eq!(kept, vec!["note"]);

        let after = entry(&db, "/f").unwrap();
        assert_eq!(after.id, before.id);
        let left = AttachedDataStore::new(db.connection())
            .select_for_entry(after.id)
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "note");
    }

    #[test]
    fn unchanged_reobservation_keeps_attached_data() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(
            &mut db,
            Hint::AttachData {
                path: "/f".to_string(),
                identity: file("1", "1"),
                key: "thumb".to_string(),
                payload: b"png".to_vec(),
                policy: DeletionPolicy::DELETE_ON_CONTENT_CHANGE,
            },
        );
        let result = apply(&mut db, Hint::file("/f", file("1", "1")));
        assert!(result.events.is_empty());
        assert_eq!(AttachedDataStore::new(db.connection()).count().unwrap(), 1);
    }

    #[test]
    fn type_mismatch_replaces_subtree() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/d/inner", file("1", "1")));
        apply(&mut db, Hint::file("/d", dir("d", "1")));

        let result = apply(&mut db, Hint::file("/d", file("d", "1")));
        assert_eq!(
            summary(&result.events),
            vec![
                (ChangeKind::Deleted, "/d".to_string()),
                (ChangeKind::Deleted, "/d/inner".to_string()),
                (ChangeKind::Created, "/d".to_string()),
            ]
        );
        assert!(!entry(&db, "/d").unwrap().is_directory);
        assert!(entry(&db, "/d/inner").is_none());
    }

    #[test]
    fn inferred_directory_confirmation_emits_created_and_keeps_children() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/a/b", file("1", "1")));
        let inferred = entry(&db, "/a").unwrap();

        let result = apply(&mut db, Hint::file("/a", dir("a", "1")));
        assert_eq!(
            summary(&result.events),
            vec![(ChangeKind::Created, "/a".to_string())]
        );
        let confirmed = entry(&db, "/a").unwrap();
        assert_eq!(confirmed.id, inferred.id);
        assert!(!confirmed.is_inferred());
        assert!(entry(&db, "/a/b").is_some());
    }

    #[test]
    fn file_ancestor_is_replaced_by_directory() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/a", file("1", "1")));

        let result = apply(&mut db, Hint::file("/a/b", file("2", "1")));
        assert_eq!(
            summary(&result.events),
            vec![
                (ChangeKind::Deleted, "/a".to_string()),
                (ChangeKind::Created, "/a/b".to_string())
            ]
        );
        let a = entry(&db, "/a").unwrap();
        assert!(a.is_directory && a.is_inferred());
    }

    #[test]
    fn directory_listing_scenario() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(
            &mut db,
            Hint::directory(
                "/a/b",
                vec![
                    ChildHint::new("e", dir("1", "1")),
                    ChildHint::new("f", file("1", "1")),
                ],
            ),
        );
        let result = apply(
            &mut db,
            Hint::directory("/a/b", vec![ChildHint::new("e", dir("1", "2"))]),
        );
        assert_eq!(
            summary(&result.events),
            vec![
                (ChangeKind::Deleted, "/a/b/f".to_string()),
                (ChangeKind::Changed, "/a/b/e".to_string())
            ]
        );
        assert_eq!(child_paths(&db, "/a/b"), vec!["/a/b/e"]);
    }

    #[test]
    fn directory_listing_replaces_mismatched_children() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(
            &mut db,
            Hint::directory(
                "/",
                vec![
                    ChildHint::new("x", file("1", "1")),
                    ChildHint::new("y", file("1", "1")),
                ],
            ),
        );
        let result = apply(
            &mut db,
            Hint::directory(
                "/",
                vec![
                    ChildHint::new("x", dir("1", "1")),
                    ChildHint::new("y", file("2", "1")),
                    ChildHint::new("z", file("1", "1")),
                ],
            ),
        );
        assert_eq!(
            summary(&result.events),
            vec![
                (ChangeKind::Deleted, "/x".to_string()),
                (ChangeKind::Deleted, "/y".to_string()),
                (ChangeKind::Created, "/x".to_string()),
                (ChangeKind::Created, "/y".to_string()),
                (ChangeKind::Created, "/z".to_string()),
            ]
        );
        assert!(entry(&db, "/x").unwrap().is_directory);
    }

    #[test]
    fn directory_listing_confirms_inferred_child_without_pruning_it() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/a/b/c", file("1", "1")));
        let result = apply(
            &mut db,
            Hint::directory("/a", vec![ChildHint::new("b", dir("b", "1"))]),
        );
        assert_eq!(
            summary(&result.events),
            vec![(ChangeKind::Created, "/a/b".to_string())]
        );
        assert!(entry(&db, "/a/b/c").is_some());
    }

    #[test]
    fn empty_listing_prunes_everything_below() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/d/x", file("1", "1")));
        apply(&mut db, Hint::file("/d/sub/y", file("1", "1")));

        let result = apply(&mut db, Hint::directory("/d", Vec::new()));
        let mut deleted: Vec<String> = result
            .events
            .iter()
            .filter(|e| e.kind == ChangeKind::Deleted)
            .map(|e| e.entry.path.clone())
            .collect();
        deleted.sort();
        // The inferred /d/sub placeholder is removed silently.
        assert_eq!(deleted, vec!["/d/sub/y", "/d/x"]);
        assert!(child_paths(&db, "/d").is_empty());
        assert!(
            EntryStore::new(db.connection())
                .select_by_path_prefix("/d/")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn duplicate_listing_names_last_wins() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(
            &mut db,
            Hint::directory(
                "/",
                vec![
                    ChildHint::new("a", file("1", "1")),
                    ChildHint::new("a", file("1", "2")),
                ],
            ),
        );
        assert_eq!(entry(&db, "/a").unwrap().content_tag.as_deref(), Some("2"));
    }

    #[test]
    fn cascade_delete_counts_identified_entries() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(&mut db, Hint::file("/d", dir("d", "1")));
        apply(&mut db, Hint::file("/d/a", file("1", "1")));
        apply(&mut db, Hint::file("/d/deep/er/b", file("1", "1")));
        apply(&mut db, Hint::file("/d/deep", dir("deep", "1")));
        apply(&mut db, Hint::file("/dd", file("1", "1")));

        let result = apply(&mut db, Hint::deleted("/d"));
        assert_eq!(
            summary(&result.events),
            vec![
                (ChangeKind::Deleted, "/d".to_string()),
                (ChangeKind::Deleted, "/d/a".to_string()),
                (ChangeKind::Deleted, "/d/deep".to_string()),
                (ChangeKind::Deleted, "/d/deep/er/b".to_string()),
            ]
        );
        assert!(entry(&db, "/d").is_none());
        assert!(entry(&db, "/dd").is_some());
    }

    #[test]
    fn delete_reports_attached_snapshots() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(
            &mut db,
            Hint::AttachData {
                path: "/d/f".to_string(),
                identity: file("1", "1"),
                key: "meta".to_string(),
                payload: b"{}".to_vec(),
                policy: DeletionPolicy::NONE,
            },
        );
        let result = apply(&mut db, Hint::deleted("/d"));
        assert_eq!(result.events.len(), 1);
        let removed: Vec<&str> = result.events[0]
            .removed_attached()
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(removed, vec!["meta"]);
        assert_eq!(AttachedDataStore::new(db.connection()).count().unwrap(), 0);
    }

    #[test]
    fn unknown_and_root_deletes_are_noops() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        assert!(apply(&mut db, Hint::deleted("/nothing")).events.is_empty());
        apply(&mut db, Hint::file("/f", file("1", "1")));
        assert!(apply(&mut db, Hint::deleted("/")).events.is_empty());
        assert!(apply(&mut db, Hint::file("/", dir("r", "1"))).events.is_empty());
        assert!(entry(&db, "/f").is_some());
    }

    #[test]
    fn attach_to_root_is_rejected() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        let tx = db.write_transaction().unwrap();
        let err = reconcile(
            &tx,
            &Hint::AttachData {
                path: "/".to_string(),
                identity: dir("r", "1"),
                key: "k".to_string(),
                payload: Vec::new(),
                policy: DeletionPolicy::NONE,
            },
        )
        .unwrap_err();
        assert!(matches!(err, TrackerError::NoIdentity { .. }));
    }

    #[test]
    fn failed_reconciliation_leaves_no_trace() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        {
            let tx = db.write_transaction().unwrap();
            let mut engine = Reconciler::new(&tx);
            engine.index_file("/x/y", Some(&file("1", "1"))).unwrap();
            // Dropped without commit.
        }
        assert!(entry(&db, "/x").is_none());
        assert!(entry(&db, "/x/y").is_none());
    }

    #[test]
    fn detach_removes_one_record() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        apply(
            &mut db,
            Hint::AttachData {
                path: "/f".to_string(),
                identity: file("1", "1"),
                key: "k".to_string(),
                payload: b"v".to_vec(),
                policy: DeletionPolicy::NONE,
            },
        );
        let first = apply(
            &mut db,
            Hint::DetachData {
                path: "/f".to_string(),
                key: "k".to_string(),
            },
        );
        assert_eq!(first.outcome, HintOutcome::Detached(true));
        let second = apply(
            &mut db,
            Hint::DetachData {
                path: "/f".to_string(),
                key: "k".to_string(),
            },
        );
        assert_eq!(second.outcome, HintOutcome::Detached(false));
    }

    #[test]
    fn comparison_table() {
        let stored = TrackedEntry {
            id: 1,
            path: "/f".to_string(),
            parent_id: Some(0),
            is_directory: false,
            identifier_tag: Some("1".to_string()),
            content_tag: Some("1".to_string()),
        };
        assert_eq!(compare(&stored, &file("1", "1")), Comparison::Unchanged);
        assert_eq!(compare(&stored, &file("1", "2")), Comparison::ContentChanged);
        assert_eq!(compare(&stored, &file("2", "1")), Comparison::Replace);
        assert_eq!(compare(&stored, &dir("1", "1")), Comparison::Replace);
        let inferred = TrackedEntry {
            identifier_tag: None,
            content_tag: None,
            is_directory: true,
            ..stored
        };
        assert_eq!(compare(&inferred, &dir("1", "1")), Comparison::Confirm);
        assert_eq!(compare(&inferred, &file("1", "1")), Comparison::Replace);
    }
}

#[cfg(test)]
mod properties {
    use proptest::prelude::*;

    use super::*;
    use crate::store::database::IndexDatabase;
    use crate::tracker::event::ChangeKind;

    fn arb_child() -> impl Strategy<Value = ChildHint> {
        ("[a-e]", any::<bool>(), 0u8..3, 0u8..3).prop_map(|(name, is_dir, id, content)| {
            let identity = Identity {
                identifier_tag: id.to_string(),
                content_tag: content.to_string(),
                is_directory: is_dir,
            };
            ChildHint::new(name, identity)
        })
    }

    fn arb_listing() -> impl Strategy<Value = Vec<ChildHint>> {
        prop::collection::vec(arb_child(), 0..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// After any sequence of listings the stored children equal the last listing.
        #[test]
        fn directory_listing_is_authoritative(
            listings in prop::collection::vec(arb_listing(), 1..5)
        ) {
            let mut db = IndexDatabase::open_in_memory().unwrap();
            for children in &listings {
                let tx = db.write_transaction().unwrap();
                reconcile(&tx, &Hint::directory("/d", children.clone())).unwrap();
                tx.commit().unwrap();
            }

            let last = listings.last().unwrap();
            let mut expected: Vec<String> = last.iter().map(|c| format!("/d/{}", c.name)).collect();
            expected.sort();
            expected.dedup();

            let store = EntryStore::new(db.connection());
            let dir = store.select_by_path("/d").unwrap().unwrap();
            let actual: Vec<String> = store
                .select_by_parent(dir.id)
                .unwrap()
                .into_iter()
                .map(|e| e.path)
                .collect();
            prop_assert_eq!(actual, expected);
        }

        /// Re-applying the same listing never produces events.
        #[test]
        fn repeated_listing_is_quiet(children in arb_listing()) {
            let mut db = IndexDatabase::open_in_memory().unwrap();
            let hint = Hint::directory("/d", children);
            for round in 0..2 {
                let tx = db.write_transaction().unwrap();
                let result = reconcile(&tx, &hint).unwrap();
                tx.commit().unwrap();
                if round == 1 {
                    prop_assert!(result.events.is_empty());
                } else {
                    prop_assert!(result.events.iter().all(|e| e.kind == ChangeKind::Created));
                }
            }
        }
    }
}
