//! Persistent index: SQLite connection, entry table, attached data table.

pub mod attached;
pub mod database;
pub mod entries;
