//! Entry store: the persistent table of tracked paths and their fingerprints.
//!
//! Pure storage. Every method runs on whatever connection or transaction the
//! caller hands in; comparisons and cascading decisions live in the
//! reconciliation engine.

#![allow(missing_docs)]

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::paths;

/// One tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntry {
    pub id: i64,
    pub path: String,
    pub parent_id: Option<i64>,
    pub is_directory: bool,
    /// `None` means the row is an inferred ancestor, never observed directly.
    pub identifier_tag: Option<String>,
    pub content_tag: Option<String>,
}

impl TrackedEntry {
    /// Whether this row exists only because a descendant was observed.
    #[must_use]
    pub fn is_inferred(&self) -> bool {
        self.identifier_tag.is_none()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            parent_id: row.get(2)?,
            is_directory: row.get(3)?,
            identifier_tag: row.get(4)?,
            content_tag: row.get(5)?,
        })
    }
}

/// Entry table operations bound to one connection or transaction.
#[derive(Clone, Copy)]
pub struct EntryStore<'c> {
    conn: &'c Connection,
}

impl<'c> EntryStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a new row and return its id.
    pub fn insert(
        &self,
        path: &str,
        parent_id: Option<i64>,
        is_directory: bool,
        identifier_tag: Option<&str>,
        content_tag: Option<&str>,
    ) -> Result<i64> {
        self.conn
            .prepare_cached(
                "INSERT INTO entries (path, parent_id, is_directory, identifier_tag, content_tag)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                path,
                parent_id,
                is_directory,
                identifier_tag,
                content_tag
            ])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn select_by_path(&self, path: &str) -> Result<Option<TrackedEntry>> {
        let entry = self
            .conn
            .prepare_cached(
                "SELECT id, path, parent_id, is_directory, identifier_tag, content_tag
                 FROM entries WHERE path = ?1",
            )?
            .query_row(params![path], TrackedEntry::from_row)
            .optional()?;
        Ok(entry)
    }

    /// Direct children of `parent_id`, ordered by path.
    pub fn select_by_parent(&self, parent_id: i64) -> Result<Vec<TrackedEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path, parent_id, is_directory, identifier_tag, content_tag
             FROM entries WHERE parent_id = ?1 ORDER BY path ASC",
        )?;
        let rows = stmt
            .query_map(params![parent_id], TrackedEntry::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every row whose path starts with `prefix`, ordered by path.
    ///
    /// `prefix` must end with `/` (see [`paths::descendant_prefix`]); the scan
    /// is a half-open range over the unique path index.
    pub fn select_by_path_prefix(&self, prefix: &str) -> Result<Vec<TrackedEntry>> {
        let upper = paths::prefix_upper_bound(prefix);
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path, parent_id, is_directory, identifier_tag, content_tag
             FROM entries WHERE path >= ?1 AND path < ?2 ORDER BY path ASC",
        )?;
        let rows = stmt
            .query_map(params![prefix, upper], TrackedEntry::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_content_tag(&self, id: i64, content_tag: Option<&str>) -> Result<()> {
        self.conn
            .prepare_cached("UPDATE entries SET content_tag = ?2 WHERE id = ?1")?
            .execute(params![id, content_tag])?;
        Ok(())
    }

    pub fn update_identifier_and_content_tag(
        &self,
        id: i64,
        identifier_tag: Option<&str>,
        content_tag: Option<&str>,
    ) -> Result<()> {
        self.conn
            .prepare_cached(
                "UPDATE entries SET identifier_tag = ?2, content_tag = ?3 WHERE id = ?1",
            )?
            .execute(params![id, identifier_tag, content_tag])?;
        Ok(())
    }

    /// Delete the row at exactly `path`. Returns the number of rows removed.
    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("DELETE FROM entries WHERE path = ?1")?
            .execute(params![path])?)
    }

    /// Delete every row whose path starts with `prefix` (must end with `/`).
    pub fn delete_by_path_prefix(&self, prefix: &str) -> Result<usize> {
        let upper = paths::prefix_upper_bound(prefix);
        Ok(self
            .conn
            .prepare_cached("DELETE FROM entries WHERE path >= ?1 AND path < ?2")?
            .execute(params![prefix, upper])?)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Rows that were directly observed (non-null identifier).
    pub fn count_observed(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE identifier_tag IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
