//! Hinted tracking: reconciliation engine, ingestion and delivery pipelines,
//! and the `HintedTracker` facade.

pub mod delivery;
pub mod event;
pub mod hint;
pub mod ingest;
pub mod policy;
pub mod progress;
pub mod reader;
pub mod reconcile;
pub mod service;
pub mod stats;

pub use reader::TrackerReader;
pub use service::{HintedTracker, TrackerOptions};
