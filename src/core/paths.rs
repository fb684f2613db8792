//! Index path rules and shared path manipulation utilities.
//!
//! Index paths are absolute, slash-separated strings independent of the host
//! platform: `/` is the root, `/a/b` is `b` inside `a`. They never carry a
//! trailing slash (except the root) and never contain empty, `.` or `..`
//! components.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{Result, TrackerError};

/// The index root.
pub const ROOT: &str = "/";

/// Whether `path` is the index root.
#[must_use]
pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Validate an index path.
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = |reason| {
        Err(TrackerError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };
    if !path.starts_with('/') {
        return invalid("path must be absolute");
    }
    if is_root(path) {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with '/'");
    }
    for component in path[1..].split('/') {
        match component {
            "" => return invalid("path contains an empty component"),
            "." | ".." => return invalid("path contains a relative component"),
            _ => {}
        }
    }
    Ok(())
}

/// Validate a single child name from a directory listing.
pub fn validate_child_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "child name is empty"
    } else if name.contains('/') {
        "child name contains '/'"
    } else if name == "." || name == ".." {
        "child name is a relative component"
    } else {
        return Ok(());
    };
    Err(TrackerError::InvalidPath {
        path: name.to_string(),
        reason,
    })
}

/// Parent of a valid index path; `None` for the root.
#[must_use]
pub fn parent_of(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a valid index path (empty for the root).
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rfind('/').map_or(path, |idx| &path[idx + 1..])
}

/// Join a directory path and a child name.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if is_root(parent) {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Prefix shared by every strict descendant of `path`.
#[must_use]
pub fn descendant_prefix(path: &str) -> String {
    if is_root(path) {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

/// Exclusive upper bound for a range scan over all strings starting with `prefix`.
///
/// Only valid for prefixes ending in `/`; `'0'` is the byte after `'/'`.
#[must_use]
pub fn prefix_upper_bound(prefix: &str) -> String {
    debug_assert!(prefix.ends_with('/'));
    let mut upper = prefix[..prefix.len() - 1].to_string();
    upper.push('0');
    upper
}

/// The chain of directories from the root down to `path`, inclusive.
///
/// `/a/b` yields `["/", "/a", "/a/b"]`.
#[must_use]
pub fn lineage(path: &str) -> Vec<&str> {
    let mut chain = vec![ROOT];
    if is_root(path) {
        return chain;
    }
    for (idx, _) in path.match_indices('/').skip(1) {
        chain.push(&path[..idx]);
    }
    chain.push(path);
    chain
}

/// Resolve a host filesystem path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components. Otherwise the path is made absolute relative to
/// CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
