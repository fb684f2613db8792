//! Directory sources: the walker's provider boundary.
//!
//! A source lists the live children of an index path with fingerprints
//! already computed. Two implementations ship with the crate: one backed by a
//! local directory and an in-memory tree.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::core::errors::{Result, TrackerError};
use crate::core::paths;
use crate::tracker::hint::{ChildHint, Identity};

/// Lists directories for the walker.
pub trait DirectorySource: Send + Sync {
    /// Current children of the directory at `path`.
    fn list(&self, path: &str) -> Result<Vec<ChildHint>>;

    /// Current identity of `path`, `None` if nothing is there.
    fn identity(&self, path: &str) -> Result<Option<Identity>>;

    /// Physical `(device, inode)` of the directory at `path`. The walker lists
    /// each key at most once per walk. `None` for sources whose tree cannot loop.
    fn directory_key(&self, _path: &str) -> Option<(u64, u64)> {
        None
    }
}

// ──────────────────── local directory ────────────────────

/// Maps index paths onto a directory on disk.
///
/// `/` is `root` itself; `/a/b` is `root/a/b`.
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
    follow_symlinks: bool,
    excluded_names: HashSet<String>,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: paths::resolve_absolute_path(&root.into()),
            follow_symlinks: false,
            excluded_names: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Child names that are never listed (e.g. `.git`).
    #[must_use]
    pub fn with_excluded_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_names.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for an index path.
    pub fn host_path(&self, path: &str) -> Result<PathBuf> {
        paths::validate_path(path)?;
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(relative))
        }
    }

    fn metadata(&self, host: &Path) -> std::io::Result<fs::Metadata> {
        if self.follow_symlinks {
            fs::metadata(host)
        } else {
            fs::symlink_metadata(host)
        }
    }
}

impl DirectorySource for LocalDirectorySource {
    fn list(&self, path: &str) -> Result<Vec<ChildHint>> {
        let host = self.host_path(path)?;
        let listing = fs::read_dir(&host).map_err(|e| TrackerError::Source {
            path: path.to_string(),
            details: format!("{}: {e}", host.display()),
        })?;

        let mut children = Vec::new();
        for entry in listing {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(dir = path, error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(dir = path, "skipping non-UTF-8 file name");
                continue;
            };
            if self.excluded_names.contains(&name) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() && !self.follow_symlinks {
                continue;
            }
            let meta = if file_type.is_symlink() {
                fs::metadata(entry.path())
            } else {
                entry.metadata()
            };
            match meta {
                Ok(meta) => children.push(ChildHint::new(name, fingerprint(&meta))),
                // Vanished between readdir and stat, or a dangling link.
                Err(e) => tracing::debug!(dir = path, name = %name, error = %e, "skipping entry"),
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    fn identity(&self, path: &str) -> Result<Option<Identity>> {
        let host = self.host_path(path)?;
        match self.metadata(&host) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(None),
            Ok(meta) => Ok(Some(fingerprint(&meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::io(host, e)),
        }
    }

    fn directory_key(&self, path: &str) -> Option<(u64, u64)> {
        // Without followed links a directory tree has no cycles.
        if !self.follow_symlinks {
            return None;
        }
        let meta = fs::metadata(self.host_path(path).ok()?).ok()?;
        device_and_inode(&meta)
    }
}

fn device_and_inode(meta: &fs::Metadata) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some((meta.dev(), meta.ino()))
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

/// Fingerprint of one filesystem object.
///
/// Identifier is the object kind plus inode, so a replaced file gets a new
/// identifier. Content is a digest of mtime and size.
#[must_use]
pub fn fingerprint(meta: &fs::Metadata) -> Identity {
    let is_directory = meta.is_dir();
    let kind = if is_directory { "dir" } else { "file" };

    #[cfg(unix)]
    let identifier_tag = {
        use std::os::unix::fs::MetadataExt;
        format!("{kind}:{}", meta.ino())
    };
    #[cfg(not(unix))]
    let identifier_tag = kind.to_string();

    let mtime_nanos = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());

    let mut hasher = Sha256::new();
    hasher.update(mtime_nanos.to_le_bytes());
    hasher.update(meta.len().to_le_bytes());
    let digest = hasher.finalize();

    Identity {
        identifier_tag,
        content_tag: hex_encode(&digest[..16]),
        is_directory,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

// ──────────────────── in-memory tree ────────────────────

/// In-memory tree for tests and embedding.
///
/// The root always exists. Inserting a path creates missing ancestor directories.
#[derive(Debug, Default)]
pub struct MemorySource {
    nodes: RwLock<BTreeMap<String, Identity>>,
    failing: RwLock<HashSet<String>>,
    next_object: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_id(&self) -> String {
        format!("mem:{}", self.next_object.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Put `identity` at `path`, creating ancestors as directories.
    pub fn insert(&self, path: &str, identity: Identity) -> Result<()> {
        paths::validate_path(path)?;
        if paths::is_root(path) {
            return Err(TrackerError::InvalidPath {
                path: path.to_string(),
                reason: "the root cannot be replaced",
            });
        }
        let mut nodes = self.nodes.write();
        for ancestor in paths::lineage(path).into_iter().skip(1) {
            if ancestor == path {
                break;
            }
            let needs_dir = nodes.get(ancestor).is_none_or(|id| !id.is_directory);
            if needs_dir {
                let prefix = paths::descendant_prefix(ancestor);
                nodes.retain(|p, _| !p.starts_with(&prefix));
                nodes.insert(
                    ancestor.to_string(),
                    Identity::directory(self.object_id(), "0"),
                );
            }
        }
        if !identity.is_directory {
            let prefix = paths::descendant_prefix(path);
            nodes.retain(|p, _| !p.starts_with(&prefix));
        }
        nodes.insert(path.to_string(), identity);
        Ok(())
    }

    /// Insert a new file object; returns its identity.
    pub fn insert_file(&self, path: &str, content_tag: &str) -> Result<Identity> {
        let identity = Identity::file(self.object_id(), content_tag);
        self.insert(path, identity.clone())?;
        Ok(identity)
    }

    /// Insert a new directory object; returns its identity.
    pub fn insert_dir(&self, path: &str) -> Result<Identity> {
        let identity = Identity::directory(self.object_id(), "0");
        self.insert(path, identity.clone())?;
        Ok(identity)
    }

    /// Change content in place, keeping the identifier. `false` if absent.
    pub fn set_content(&self, path: &str, content_tag: &str) -> bool {
        match self.nodes.write().get_mut(path) {
            Some(identity) => {
                identity.content_tag = content_tag.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove `path` and everything below it. Returns the number of nodes removed.
    pub fn remove(&self, path: &str) -> usize {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        let prefix = paths::descendant_prefix(path);
        nodes.retain(|p, _| p != path && !p.starts_with(&prefix));
        before - nodes.len()
    }

    /// Make listings of `path` fail until cleared.
    pub fn set_failing(&self, path: &str, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(path.to_string());
        } else {
            set.remove(path);
        }
    }
}

impl DirectorySource for MemorySource {
    fn list(&self, path: &str) -> Result<Vec<ChildHint>> {
        paths::validate_path(path)?;
        if self.failing.read().contains(path) {
            return Err(TrackerError::Source {
                path: path.to_string(),
                details: "listing failure injected".to_string(),
            });
        }
        let nodes = self.nodes.read();
        if !paths::is_root(path) && !nodes.get(path).is_some_and(|id| id.is_directory) {
            return Err(TrackerError::Source {
                path: path.to_string(),
                details: "no such directory".to_string(),
            });
        }
        let prefix = paths::descendant_prefix(path);
        let upper = paths::prefix_upper_bound(&prefix);
        let children = nodes
            .range(prefix..upper)
            .filter(|(child, _)| paths::parent_of(child) == Some(path))
            .map(|(child, identity)| ChildHint::new(paths::file_name(child), identity.clone()))
            .collect();
        Ok(children)
    }

    fn identity(&self, path: &str) -> Result<Option<Identity>> {
        paths::validate_path(path)?;
        if paths::is_root(path) {
            return Ok(Some(Identity::directory("mem:root", "0")));
        }
        Ok(self.nodes.read().get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use filetime::FileTime;

    use super::*;

    #[test]
    fn hex_encode_correctness() {
        assert_eq!(hex_encode(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn local_listing_is_sorted_and_typed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("b_dir")).unwrap();
        fs::write(tmp.path().join("a_file"), b"hello").unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();

        let source = LocalDirectorySource::new(tmp.path()).with_excluded_names([".git"]);
        let children = source.list("/").unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a_file", "b_dir"]);
        assert!(!children[0].identity.is_directory);
        assert!(children[1].identity.is_directory);
        assert_eq!(children[0].identity.content_tag.len(), 32);
    }

    #[test]
    fn local_content_tag_tracks_mtime_and_size() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"one").unwrap();
        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let source = LocalDirectorySource::new(tmp.path());
        let before = source.identity("/f").unwrap().unwrap();
        assert_eq!(source.identity("/f").unwrap().unwrap(), before);

        filetime::set_file_mtime(&file, FileTime::from_unix_time(2_000_000, 0)).unwrap();
        let after = source.identity("/f").unwrap().unwrap();
        assert_eq!(after.identifier_tag, before.identifier_tag);
        assert_ne!(after.content_tag, before.content_tag);
    }

    #[test]
    fn local_missing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let source = LocalDirectorySource::new(tmp.path());
        assert!(source.identity("/absent").unwrap().is_none());
        assert_eq!(source.list("/absent").unwrap_err().code(), "HTR-3101");
        assert!(source.host_path("relative").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn local_symlinks_skipped_unless_followed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let plain = LocalDirectorySource::new(tmp.path());
        assert_eq!(plain.list("/").unwrap().len(), 1);

        let following = LocalDirectorySource::new(tmp.path()).with_follow_symlinks(true);
        let children = following.list("/").unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.identity.is_directory));
    }

    #[test]
    fn memory_tree_lists_direct_children() {
        let source = MemorySource::new();
        source.insert_file("/a/x", "1").unwrap();
        source.insert_file("/a/sub/y", "1").unwrap();
        source.insert_file("/ab", "1").unwrap();

        let root: Vec<String> = source.list("/").unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(root, vec!["a", "ab"]);
        let a: Vec<String> = source.list("/a").unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(a, vec!["sub", "x"]);
        assert!(source.list("/a/x").is_err());
    }

    #[test]
    fn memory_tree_mutations() {
        let source = MemorySource::new();
        let id = source.insert_file("/d/f", "1").unwrap();
        assert!(source.set_content("/d/f", "2"));
        let now = source.identity("/d/f").unwrap().unwrap();
        assert_eq!(now.identifier_tag, id.identifier_tag);
        assert_eq!(now.content_tag, "2");

        assert_eq!(source.remove("/d"), 2);
        assert!(source.identity("/d").unwrap().is_none());

        source.insert_dir("/e").unwrap();
        source.set_failing("/e", true);
        assert!(source.list("/e").is_err());
        source.set_failing("/e", false);
        assert!(source.list("/e").unwrap().is_empty());
    }
}
