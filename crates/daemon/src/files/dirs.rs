//! Recursive directory creation and removal.

use std::io;

use thiserror::Error;
use tracing::{debug, error};

use super::path::StoragePath;
use super::storage::{EntryKind, Storage};

/// Refusal to remove the storage root or mount point.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("refusing to remove protected path {0}")]
pub struct ProtectedPathError(pub String);

/// Paths that may never be removed recursively.
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    mount: Option<StoragePath>,
}

impl ProtectedPaths {
    /// Protect the root and, if it names one, the mount point alias
    /// (for example `/sdcard`).
    pub fn new(mount_name: &str) -> Self {
        let mount = StoragePath::parse(mount_name)
            .ok()
            .filter(|p| !p.is_root());
        Self { mount }
    }

    pub fn contains(&self, path: &StoragePath) -> bool {
        path.is_root() || self.mount.as_ref() == Some(path)
    }
}

/// Outcome of [`remove_dir_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub failures: usize,
}

impl RemovalReport {
    /// Whether every entry, including the directory itself, was removed.
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Create `path` and every missing ancestor, parents first.
///
/// Succeeds when the directory already exists. Fails if any prefix exists as
/// a file.
pub fn create_dir_all<S: Storage>(storage: &S, path: &StoragePath) -> io::Result<()> {
    for prefix in path.prefixes() {
        match storage.stat(&prefix) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} exists and is not a directory", prefix),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => match storage.create_dir(&prefix) {
                Ok(()) => debug!(path = %prefix, "Created directory"),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove `path` and everything below it, children before parents.
///
/// Removal is best-effort: a failing entry is counted and its siblings are
/// still attempted. The caller is expected to have checked that `path` exists
/// and is a directory.
pub fn remove_dir_all<S: Storage>(
    storage: &S,
    path: &StoragePath,
    protected: &ProtectedPaths,
) -> Result<RemovalReport, ProtectedPathError> {
    if protected.contains(path) {
        return Err(ProtectedPathError(path.to_string()));
    }

    let mut report = RemovalReport::default();
    remove_tree(storage, path, &mut report);
    Ok(report)
}

fn remove_tree<S: Storage>(storage: &S, path: &StoragePath, report: &mut RemovalReport) {
    match storage.list(path) {
        Ok(entries) => {
            for entry in entries {
                let child = match path.join(&entry.name) {
                    Ok(child) => child,
                    Err(e) => {
                        error!(path = %path, name = %entry.name, error = %e, "Unremovable entry name");
                        report.failures += 1;
                        continue;
                    }
                };
                match entry.kind {
                    EntryKind::Directory => remove_tree(storage, &child, report),
                    EntryKind::File => match storage.remove_file(&child) {
                        Ok(()) => report.files_removed += 1,
                        Err(e) => {
                            error!(path = %child, error = %e, "Failed to delete file");
                            report.failures += 1;
                        }
                    },
                }
            }
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to list directory");
            report.failures += 1;
        }
    }

    match storage.remove_dir(path) {
        Ok(()) => report.dirs_removed += 1,
        Err(e) => {
            error!(path = %path, error = %e, "Failed to delete directory");
            report.failures += 1;
        }
    }
}
