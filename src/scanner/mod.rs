//! Scanning: directory sources and the background walker that feeds
//! directory hints into a tracker.

pub mod source;
pub mod walker;
