//! HTR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Top-level error type for the hinted file tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("[HTR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HTR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HTR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HTR-2001] invalid index path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("[HTR-2002] cannot attach data to {path}: entry has no identity")]
    NoIdentity { path: String },

    #[error("[HTR-2003] index consistency violation at {path}: {details}")]
    Consistency { path: String, details: String },

    #[error("[HTR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HTR-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[HTR-3001] no index database at {path}")]
    MissingIndex { path: PathBuf },

    #[error("[HTR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[HTR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[HTR-3101] file source failure listing {path}: {details}")]
    Source { path: String, details: String },

    #[error("[HTR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl TrackerError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HTR-1001",
            Self::MissingConfig { .. } => "HTR-1002",
            Self::ConfigParse { .. } => "HTR-1003",
            Self::InvalidPath { .. } => "HTR-2001",
            Self::NoIdentity { .. } => "HTR-2002",
            Self::Consistency { .. } => "HTR-2003",
            Self::Serialization { .. } => "HTR-2101",
            Self::Sql { .. } => "HTR-2102",
            Self::MissingIndex { .. } => "HTR-3001",
            Self::Io { .. } => "HTR-3002",
            Self::ChannelClosed { .. } => "HTR-3003",
            Self::Source { .. } => "HTR-3101",
            Self::Runtime { .. } => "HTR-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Caller-misuse errors (bad paths, missing identity, invalid config) are
    /// never retryable; storage and IO errors usually are.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::Source { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for consistency violations.
    #[must_use]
    pub fn consistency(path: &str, details: impl Into<String>) -> Self {
        Self::Consistency {
            path: path.to_string(),
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TrackerError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
