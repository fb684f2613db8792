#![forbid(unsafe_code)]

//! Hinted file tracker (htrk): a persistent, incrementally updated index of a
//! file source's tree, driven by hints and reporting ordered change events.
//!
//! Pieces, leaves first:
//! 1. **Store**: SQLite tables of tracked entries and attached data
//! 2. **Tracker**: reconciliation engine plus the ingestion and delivery pipelines
//! 3. **Scanner**: directory sources and the background walker
//!
//! # Library usage
//!
//! ```rust,no_run
//! use hinted_file_tracker::prelude::*;
//!
//! # fn main() -> hinted_file_tracker::core::errors::Result<()> {
//! let tracker = HintedTracker::open(TrackerOptions::new("/tmp/htrk/index.sqlite3"))?;
//! let (_id, events) = tracker.subscribe_channel();
//! tracker.index_file("/notes/todo.txt", Some(Identity::file("inode:42", "v1")))?;
//! tracker.wait_complete();
//! for batch in events.try_iter() {
//!     for event in batch {
//!         println!("{:?} {}", event.kind, event.path());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
#[cfg(feature = "daemon")]
pub mod daemon;
pub mod logger;
pub mod scanner;
pub mod store;
pub mod tracker;
