//! Change journal: an append-only JSONL record of delivered change events.
//!
//! One event per line, each line written with a single `write_all` so a
//! tailing reader never sees a partial line. Files rotate by size.
//!
//! Degradation chain:
//! 1. Journal file
//! 2. stderr with `[HTRK-JOURNAL]` prefix
//! 3. Silent discard (the delivery pipeline must never fail for journaling)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::JournalSettings;
use crate::core::errors::{Result, TrackerError};
use crate::tracker::HintedTracker;
use crate::tracker::delivery::SubscriptionId;
use crate::tracker::event::{ChangeEvent, ChangeKind};

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: ChangeKind,
    pub path: String,
    pub entry_id: i64,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_tag: Option<String>,
    /// Keys of attached records still present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached: Vec<String>,
    /// Keys of attached records this event removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl JournalLine {
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self {
            ts: format_utc_now(),
            event: event.kind,
            path: event.entry.path.clone(),
            entry_id: event.entry.id,
            is_directory: event.entry.is_directory,
            identifier_tag: event.entry.identifier_tag.clone(),
            content_tag: event.entry.content_tag.clone(),
            attached: event.kept_attached().map(|r| r.key.clone()).collect(),
            removed: event.removed_attached().map(|r| r.key.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub path: PathBuf,
    /// Rotate before a write would push the file past this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval: Duration,
}

impl JournalConfig {
    pub fn from_settings(settings: &JournalSettings) -> Self {
        Self {
            path: settings.path.clone(),
            max_size_bytes: settings.max_size_bytes,
            max_rotated_files: settings.max_rotated_files,
            fsync_interval: Duration::from_secs(10),
        }
    }
}

/// Rotating JSONL writer behind the journal.
pub struct JournalWriter {
    config: JournalConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JournalWriter {
    /// Open the journal file, degrading to stderr if that fails.
    pub fn open(config: JournalConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        match open_append(&w.config.path) {
            Ok((file, size)) => {
                w.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                w.state = WriterState::Normal;
                w.bytes_written = size;
            }
            Err(e) => {
                tracing::warn!(
                    code = e.code(),
                    error = %e,
                    "journal file unavailable; writing to stderr"
                );
                w.state = WriterState::Stderr;
            }
        }
        w
    }

    pub fn write_line(&mut self, line: &JournalLine) {
        match serde_json::to_string(line) {
            Ok(json) => self.write_raw(&format!("{json}\n")),
            Err(e) => tracing::error!(error = %e, "journal line did not serialize"),
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        if self.last_fsync.elapsed() >= self.config.fsync_interval {
            self.fsync();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    // ──────────────────────── internals ────────────────────────

    fn write_raw(&mut self, line: &str) {
        if self.state == WriterState::Normal
            && self.bytes_written > 0
            && self.bytes_written + line.len() as u64 > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal => {
                let Some(w) = self.writer.as_mut() else {
                    self.degrade();
                    self.write_raw(line);
                    return;
                };
                if w.write_all(line.as_bytes()).is_err() {
                    self.degrade();
                    self.write_raw(line);
                    return;
                }
                self.bytes_written += line.len() as u64;
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[HTRK-JOURNAL] {line}").is_err() {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                tracing::warn!(
                    path = %self.config.path.display(),
                    "journal write failed; writing to stderr"
                );
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;
        let base = self.config.path.clone();

        if self.config.max_rotated_files == 0 {
            let _ = fs::remove_file(&base);
        } else {
            for i in (1..self.config.max_rotated_files).rev() {
                let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
            }
            let _ = rename(&base, rotated_name(&base, 1));
        }

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

/// Subscriber that journals every delivered batch.
pub struct ChangeJournal {
    writer: Mutex<JournalWriter>,
}

impl ChangeJournal {
    pub fn open(config: JournalConfig) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(JournalWriter::open(config)),
        })
    }

    pub fn record(&self, events: &[ChangeEvent]) {
        let mut writer = self.writer.lock();
        for event in events {
            writer.write_line(&JournalLine::from_event(event));
        }
        writer.flush();
    }

    /// Subscribe this journal to `tracker`.
    pub fn attach(self: &Arc<Self>, tracker: &HintedTracker) -> SubscriptionId {
        let journal = Arc::clone(self);
        tracker.subscribe(move |events| journal.record(events))
    }

    pub fn state(&self) -> String {
        self.writer.lock().state().to_string()
    }

    pub fn close(&self) {
        self.writer.lock().fsync();
    }
}

// ──────────────────────── helpers ────────────────────────

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| TrackerError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TrackerError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `changes.jsonl` → `changes.jsonl.2`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::attached::{AttachedDataRecord, DeletionPolicy};
    use crate::store::entries::TrackedEntry;
    use crate::tracker::event::AttachedSnapshot;

    fn config(path: PathBuf, max_size_bytes: u64) -> JournalConfig {
        JournalConfig {
            path,
            max_size_bytes,
            max_rotated_files: 2,
            fsync_interval: Duration::from_secs(60),
        }
    }

    fn changed_event() -> ChangeEvent {
        let record = |id: i64, key: &str| AttachedDataRecord {
            id,
            target_entry_id: 7,
            key: key.to_string(),
            payload: Vec::new(),
            policy: DeletionPolicy::NONE,
        };
        ChangeEvent::changed(
            TrackedEntry {
                id: 7,
                path: "/docs/a.txt".to_string(),
                parent_id: Some(2),
                is_directory: false,
                identifier_tag: Some("file:1".to_string()),
                content_tag: Some("abc".to_string()),
            },
            vec![
                AttachedSnapshot {
                    record: record(1, "note"),
                    removed: false,
                },
                AttachedSnapshot {
                    record: record(2, "thumb"),
                    removed: true,
                },
            ],
        )
    }

    #[test]
    fn records_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");
        let journal = ChangeJournal::open(config(path.clone(), 1024 * 1024));
        journal.record(&[changed_event(), changed_event()]);
        assert_eq!(journal.state(), "normal");

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: JournalLine = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.event, ChangeKind::Changed);
        assert_eq!(parsed.path, "/docs/a.txt");
        assert_eq!(parsed.attached, vec!["note"]);
        assert_eq!(parsed.removed, vec!["thumb"]);

        let raw: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(raw["event"], "changed");
    }

    #[test]
    fn rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JournalWriter::open(config(path.clone(), 200));
        for _ in 0..20 {
            writer.write_line(&JournalLine::from_event(&changed_event()));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(rotated_name(&path, 2).exists());
        assert!(!rotated_name(&path, 3).exists());
    }

    #[test]
    fn unwritable_path_degrades_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let journal = ChangeJournal::open(config(blocker.join("changes.jsonl"), 1024));
        assert_eq!(journal.state(), "stderr");
        journal.record(&[changed_event()]);
    }
}
