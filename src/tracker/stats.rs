//! Pipeline counters.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of the tracker's pipelines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub hints_applied: u64,
    /// Hints dropped because reconciliation failed.
    pub failed_hints: u64,
    pub events_emitted: u64,
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub subscriber_panics: u64,
    /// Hints plus event batches not yet fully processed.
    pub in_flight: u64,
}

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub hints_applied: AtomicU64,
    pub failed_hints: AtomicU64,
    pub events_emitted: AtomicU64,
    pub batches_delivered: AtomicU64,
    pub events_delivered: AtomicU64,
    pub subscriber_panics: AtomicU64,
}

impl PipelineCounters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self, in_flight: u64) -> TrackerStats {
        TrackerStats {
            hints_applied: self.hints_applied.load(Ordering::Relaxed),
            failed_hints: self.failed_hints.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            subscriber_panics: self.subscriber_panics.load(Ordering::Relaxed),
            in_flight,
        }
    }
}
