//! Directory listing for the list endpoint.

use std::cmp::Ordering;

use protocol::FileEntry;

use super::path::StoragePath;
use super::storage::{EntryKind, FileSystemEntry, Storage};
use crate::response::GatewayError;

/// Lists directories of a [`Storage`].
pub struct DirectoryBrowser<'a, S: Storage> {
    storage: &'a S,
    include_hidden: bool,
}

impl<'a, S: Storage> DirectoryBrowser<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            include_hidden: true,
        }
    }

    /// Whether entries starting with `.` are listed (default: yes).
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// List the direct children of `path`, directories first, then by
    /// case-insensitive name.
    pub fn list(&self, path: &StoragePath) -> Result<Vec<FileEntry>, GatewayError> {
        let meta = self.storage.stat(path).map_err(|e| {
            GatewayError::from_io(e, "Directory not found", "Failed to open directory")
        })?;
        if !meta.is_dir() {
            return Err(GatewayError::bad_request("Path is not a directory"));
        }

        let mut entries: Vec<FileSystemEntry> = self
            .storage
            .list(path)
            .map_err(|e| {
                GatewayError::from_io(e, "Directory not found", "Failed to read directory")
            })?
            .into_iter()
            .filter(|entry| self.include_hidden || !entry.name.starts_with('.'))
            .collect();

        entries.sort_by(|a, b| match (a.kind, b.kind) {
            (EntryKind::Directory, EntryKind::File) => Ordering::Less,
            (EntryKind::File, EntryKind::Directory) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(entries.iter().map(FileSystemEntry::to_protocol).collect())
    }
}
