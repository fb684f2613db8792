//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use hinted_file_tracker::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, TrackerError};

// Store
pub use crate::store::attached::{AttachedDataRecord, DeletionPolicy};
pub use crate::store::entries::TrackedEntry;

// Tracker
pub use crate::tracker::delivery::SubscriptionId;
pub use crate::tracker::event::{AttachedSnapshot, ChangeEvent, ChangeKind};
pub use crate::tracker::hint::{ChildHint, Hint, Identity};
pub use crate::tracker::reader::{IndexSummary, TrackerReader};
pub use crate::tracker::reconcile::{HintOutcome, Reconciliation};
pub use crate::tracker::service::{HintedTracker, TrackerOptions};
pub use crate::tracker::stats::TrackerStats;

// Scanner
pub use crate::scanner::source::{DirectorySource, LocalDirectorySource, MemorySource};
pub use crate::scanner::walker::{DirectoryWalker, HintSink, WalkStats, WalkerConfig, WalkerHandle};

// Logger
pub use crate::logger::journal::{ChangeJournal, JournalConfig};
