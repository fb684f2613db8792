//! Attached data store: derived payloads bound to tracked entries.
//!
//! Records are keyed by `(target_entry_id, key)` and disappear with their
//! entry through `ON DELETE CASCADE`.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::paths;

/// Deletion policy flags carried by each attached record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletionPolicy(u32);

impl DeletionPolicy {
    /// Keep the record until it is detached or its entry is deleted.
    pub const NONE: Self = Self(0);
    /// Drop the record when its entry's content tag changes.
    pub const DELETE_ON_CONTENT_CHANGE: Self = Self(1);

    const ALL: u32 = Self::DELETE_ON_CONTENT_CHANGE.0;

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, discarding unknown flags.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DeletionPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeletionPolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("DeletionPolicy(NONE)");
        }
        f.write_str("DeletionPolicy(")?;
        if self.contains(Self::DELETE_ON_CONTENT_CHANGE) {
            f.write_str("DELETE_ON_CONTENT_CHANGE")?;
        }
        f.write_str(")")
    }
}

/// One derived payload attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDataRecord {
    pub id: i64,
    pub target_entry_id: i64,
    pub key: String,
    pub payload: Vec<u8>,
    pub policy: DeletionPolicy,
}

impl AttachedDataRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            target_entry_id: row.get(1)?,
            key: row.get(2)?,
            payload: row.get(3)?,
            policy: DeletionPolicy::from_bits_truncate(row.get(4)?),
        })
    }
}

/// Attached data operations bound to one connection or transaction.
#[derive(Clone, Copy)]
pub struct AttachedDataStore<'c> {
    conn: &'c Connection,
}

impl<'c> AttachedDataStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace the `(target, key)` record and return it.
    ///
    /// Replacing keeps the record id.
    pub fn upsert(
        &self,
        target_entry_id: i64,
        key: &str,
        payload: &[u8],
        policy: DeletionPolicy,
    ) -> Result<AttachedDataRecord> {
        self.conn
            .prepare_cached(
                "INSERT INTO attached_data (target_entry_id, key, payload, policy_flags)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (target_entry_id, key)
                 DO UPDATE SET payload = excluded.payload, policy_flags = excluded.policy_flags",
            )?
            .execute(params![target_entry_id, key, payload, policy.bits()])?;
        let record = self
            .select_by_key(target_entry_id, key)?
            .ok_or_else(|| crate::core::errors::TrackerError::Sql {
                context: "attached_data upsert",
                details: format!("record ({target_entry_id}, {key:?}) missing after upsert"),
            })?;
        Ok(record)
    }

    pub fn select_by_key(
        &self,
        target_entry_id: i64,
        key: &str,
    ) -> Result<Option<AttachedDataRecord>> {
        let record = self
            .conn
            .prepare_cached(
                "SELECT id, target_entry_id, key, payload, policy_flags
                 FROM attached_data WHERE target_entry_id = ?1 AND key = ?2",
            )?
            .query_row(params![target_entry_id, key], AttachedDataRecord::from_row)
            .optional()?;
        Ok(record)
    }

    /// All records of one entry, ordered by key.
    pub fn select_for_entry(&self, target_entry_id: i64) -> Result<Vec<AttachedDataRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, target_entry_id, key, payload, policy_flags
             FROM attached_data WHERE target_entry_id = ?1 ORDER BY key ASC",
        )?;
        let rows = stmt
            .query_map(params![target_entry_id], AttachedDataRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records of the entry at `path` and of every entry below it, grouped by entry id.
    pub fn select_for_subtree(&self, path: &str) -> Result<HashMap<i64, Vec<AttachedDataRecord>>> {
        let prefix = paths::descendant_prefix(path);
        let upper = paths::prefix_upper_bound(&prefix);
        let mut stmt = self.conn.prepare_cached(
            "SELECT a.id, a.target_entry_id, a.key, a.payload, a.policy_flags
             FROM attached_data a JOIN entries e ON e.id = a.target_entry_id
             WHERE e.path = ?1 OR (e.path >= ?2 AND e.path < ?3)
             ORDER BY a.target_entry_id ASC, a.key ASC",
        )?;
        let mut grouped: HashMap<i64, Vec<AttachedDataRecord>> = HashMap::new();
        for record in stmt.query_map(params![path, prefix, upper], AttachedDataRecord::from_row)? {
            let record = record?;
            grouped.entry(record.target_entry_id).or_default().push(record);
        }
        Ok(grouped)
    }

    pub fn delete_by_id(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM attached_data WHERE id = ?1")?
            .execute(params![id])?;
        Ok(removed > 0)
    }

    pub fn delete_by_key(&self, target_entry_id: i64, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM attached_data WHERE target_entry_id = ?1 AND key = ?2")?
            .execute(params![target_entry_id, key])?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM attached_data", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
