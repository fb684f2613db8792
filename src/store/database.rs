//! SQLite index database: WAL-mode connection, PRAGMAs, and schema.
//!
//! One `IndexDatabase` is one connection. The ingestion consumer owns the only
//! writing connection; readers open their own and rely on WAL isolation.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use crate::core::errors::{Result, TrackerError};

/// Schema revision stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// A connection to the persistent index.
pub struct IndexDatabase {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for IndexDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl IndexDatabase {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| TrackerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;

        apply_pragmas(&conn, true)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an existing index for reading only. Never creates or migrates.
    pub fn open_read_only(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if !path.is_file() {
            return Err(TrackerError::MissingIndex {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        // An empty or foreign SQLite file has no schema revision.
        if db.schema_version()? == 0 {
            return Err(TrackerError::MissingIndex {
                path: path.to_path_buf(),
            });
        }
        Ok(db)
    }

    /// Private in-memory database. Only one connection can see it.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, false)?;
        apply_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Path to the database file (`None` for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin the write transaction for one reconciliation.
    ///
    /// `IMMEDIATE` takes the write lock up front so a concurrent writer is
    /// reported as busy before any work is done.
    pub fn write_transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Begin a read transaction with a consistent snapshot.
    pub fn read_transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?)
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }

    /// Stored schema revision.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection, file_backed: bool) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;",
    )?;
    if file_backed {
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(mode = %mode, "requested WAL journal mode but SQLite refused");
        }
    }
    let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if fk != 1 {
        return Err(TrackerError::Runtime {
            details: "SQLite build does not enforce foreign keys".to_string(),
        });
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            parent_id INTEGER REFERENCES entries(id) ON DELETE CASCADE,
            is_directory INTEGER NOT NULL,
            identifier_tag TEXT,
            content_tag TEXT
        );

        CREATE TABLE IF NOT EXISTS attached_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            payload BLOB NOT NULL,
            policy_flags INTEGER NOT NULL DEFAULT 0,
            UNIQUE (target_entry_id, key)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent_id);",
    )?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    } else if version > SCHEMA_VERSION {
        return Err(TrackerError::Runtime {
            details: format!(
                "index schema version {version} is newer than supported {SCHEMA_VERSION}"
            ),
        });
    }
    Ok(())
}

// ──────────────────── tests ────────────────────
