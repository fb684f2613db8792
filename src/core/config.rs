//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TrackerError};

/// Full tracker configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub queues: QueueConfig,
    pub walker: WalkerSettings,
    pub journal: JournalSettings,
    pub paths: PathsConfig,
}

/// Persistent index location and SQLite tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub busy_timeout_ms: u64,
}

/// Capacities of the two bounded pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Hints waiting for reconciliation before producers block.
    pub hint_capacity: usize,
    /// Committed event batches waiting for delivery before ingestion blocks.
    pub event_capacity: usize,
}

/// Directory walker behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalkerSettings {
    /// Seconds between automatic full walks. Zero disables periodic walks;
    /// unset leaves the choice to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescan_interval_secs: Option<u64>,
    pub follow_symlinks: bool,
    /// Child names never reported by the local source (e.g. `.git`).
    pub excluded_names: Vec<String>,
}

/// Optional JSONL change journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by htrk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

const MIN_JOURNAL_SIZE: u64 = 4096;
const MAX_BUSY_TIMEOUT_MS: u64 = 10 * 60 * 1000;

fn data_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            tracing::warn!("HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        |home| PathBuf::from(home).join(".local").join("share").join("htrk"),
    )
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: data_dir().join("index.sqlite3"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            hint_capacity: 1024,
            event_capacity: 256,
        }
    }
}

impl Default for WalkerSettings {
    fn default() -> Self {
        Self {
            rescan_interval_secs: None,
            follow_symlinks: false,
            excluded_names: Vec::new(),
        }
    }
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: data_dir().join("changes.jsonl"),
            max_size_bytes: 64 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            config_file: home_dir.join(".config").join("htrk").join("config.toml"),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl WalkerSettings {
    /// Periodic rescan interval, if enabled.
    #[must_use]
    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| TrackerError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(TrackerError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(|name| env::var(name).ok())?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = var("HTRK_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(raw);
        }
        if let Some(raw) = var("HTRK_BUSY_TIMEOUT_MS") {
            self.store.busy_timeout_ms = parse_env("HTRK_BUSY_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = var("HTRK_HINT_CAPACITY") {
            self.queues.hint_capacity = parse_env("HTRK_HINT_CAPACITY", &raw)?;
        }
        if let Some(raw) = var("HTRK_EVENT_CAPACITY") {
            self.queues.event_capacity = parse_env("HTRK_EVENT_CAPACITY", &raw)?;
        }
        if let Some(raw) = var("HTRK_RESCAN_INTERVAL_SECS") {
            let secs: u64 = parse_env("HTRK_RESCAN_INTERVAL_SECS", &raw)?;
            self.walker.rescan_interval_secs = Some(secs);
        }
        if let Some(raw) = var("HTRK_FOLLOW_SYMLINKS") {
            self.walker.follow_symlinks = parse_env("HTRK_FOLLOW_SYMLINKS", &raw)?;
        }
        if let Some(raw) = var("HTRK_JOURNAL_ENABLED") {
            self.journal.enabled = parse_env("HTRK_JOURNAL_ENABLED", &raw)?;
        }
        if let Some(raw) = var("HTRK_JOURNAL_PATH") {
            self.journal.path = PathBuf::from(raw);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        for name in &mut self.walker.excluded_names {
            *name = name.trim().to_string();
        }
        self.walker.excluded_names.retain(|name| !name.is_empty());
        self.walker.excluded_names.sort();
        self.walker.excluded_names.dedup();
    }

    fn validate(&self) -> Result<()> {
        if self.queues.hint_capacity == 0 {
            return Err(TrackerError::InvalidConfig {
                details: "queues.hint_capacity must be >= 1".to_string(),
            });
        }
        if self.queues.event_capacity == 0 {
            return Err(TrackerError::InvalidConfig {
                details: "queues.event_capacity must be >= 1".to_string(),
            });
        }
        if self.store.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(TrackerError::InvalidConfig {
                details: format!(
                    "store.busy_timeout_ms must be <= {MAX_BUSY_TIMEOUT_MS}, got {}",
                    self.store.busy_timeout_ms
                ),
            });
        }
        if self.store.database_path.as_os_str().is_empty() {
            return Err(TrackerError::InvalidConfig {
                details: "store.database_path must not be empty".to_string(),
            });
        }
        if self.journal.enabled && self.journal.max_size_bytes < MIN_JOURNAL_SIZE {
            return Err(TrackerError::InvalidConfig {
                details: format!(
                    "journal.max_size_bytes must be >= {MIN_JOURNAL_SIZE}, got {}",
                    self.journal.max_size_bytes
                ),
            });
        }
        for name in &self.walker.excluded_names {
            crate::core::paths::validate_child_name(name).map_err(|_| {
                TrackerError::InvalidConfig {
                    details: format!("walker.excluded_names contains invalid name {name:?}"),
                }
            })?;
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| TrackerError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
