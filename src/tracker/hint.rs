//! Hints: externally supplied observations about a path's current state.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::paths;
use crate::store::attached::DeletionPolicy;

/// Opaque fingerprint of the object currently at a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Which object occupies the path. A change means replace, not update.
    pub identifier_tag: String,
    /// Version of that object's content. A change means update in place.
    pub content_tag: String,
    pub is_directory: bool,
}

impl Identity {
    pub fn file(identifier_tag: impl Into<String>, content_tag: impl Into<String>) -> Self {
        Self {
            identifier_tag: identifier_tag.into(),
            content_tag: content_tag.into(),
            is_directory: false,
        }
    }

    pub fn directory(identifier_tag: impl Into<String>, content_tag: impl Into<String>) -> Self {
        Self {
            identifier_tag: identifier_tag.into(),
            content_tag: content_tag.into(),
            is_directory: true,
        }
    }
}

/// One child in an authoritative directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildHint {
    pub name: String,
    pub identity: Identity,
}

impl ChildHint {
    pub fn new(name: impl Into<String>, identity: Identity) -> Self {
        Self {
            name: name.into(),
            identity,
        }
    }
}

/// An observation to reconcile into the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Current state of one path; `None` means it no longer exists.
    File {
        path: String,
        identity: Option<Identity>,
    },
    /// Complete listing of a directory's children.
    Directory {
        path: String,
        children: Vec<ChildHint>,
    },
    Deleted {
        path: String,
    },
    /// Make the entry current, then store a derived payload on it.
    AttachData {
        path: String,
        identity: Identity,
        key: String,
        payload: Vec<u8>,
        policy: DeletionPolicy,
    },
    /// Remove one derived payload.
    DetachData {
        path: String,
        key: String,
    },
}

impl Hint {
    pub fn file(path: impl Into<String>, identity: Identity) -> Self {
        Self::File {
            path: path.into(),
            identity: Some(identity),
        }
    }

    pub fn directory(path: impl Into<String>, children: Vec<ChildHint>) -> Self {
        Self::Directory {
            path: path.into(),
            children,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self::Deleted { path: path.into() }
    }

    /// Path the hint is about.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. }
            | Self::Directory { path, .. }
            | Self::Deleted { path }
            | Self::AttachData { path, .. }
            | Self::DetachData { path, .. } => path,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Directory { .. } => "directory",
            Self::Deleted { .. } => "deleted",
            Self::AttachData { .. } => "attach_data",
            Self::DetachData { .. } => "detach_data",
        }
    }

    /// Reject malformed paths and child names before the hint is queued.
    pub fn validate(&self) -> Result<()> {
        paths::validate_path(self.path())?;
        if let Self::Directory { children, .. } = self {
            for child in children {
                paths::validate_child_name(&child.name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_and_labels() {
        let hint = Hint::file("/a/b", Identity::file("f", "1"));
        assert_eq!(hint.path(), "/a/b");
        assert_eq!(hint.kind(), "file");
        assert_eq!(Hint::deleted("/x").kind(), "deleted");
        assert!(Identity::directory("d", "1").is_directory);
    }

    #[test]
    fn validation_covers_children() {
        let ok = Hint::directory("/a", vec![ChildHint::new("b", Identity::file("f", "1"))]);
        assert!(ok.validate().is_ok());

        let bad_child = Hint::directory(
            "/a",
            vec![ChildHint::new("b/c", Identity::file("f", "1"))],
        );
        assert_eq!(bad_child.validate().unwrap_err().code(), "HTR-2001");

        let bad_path = Hint::deleted("relative/path");
        assert!(bad_path.validate().is_err());
    }
}
