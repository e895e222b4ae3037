//! Byte-stream storage abstraction.
//!
//! The HTTP handlers and transfer engine only ever talk to a [`Storage`]:
//! open for read, create for write (truncating), stat, list, rename, remove
//! and make directories, and report capacity. [`MountedStorage`] implements it on top
//! of a directory of the host filesystem (the SD card mount on the device).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use protocol::FileEntry;
use tracing::debug;

use super::path::StoragePath;

/// Kind of a storage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Result of [`Storage::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub kind: EntryKind,
    /// Size in bytes, 0 for directories.
    pub size: u64,
}

impl EntryMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemEntry {
    /// Entry name, not the full path.
    pub name: String,
    pub kind: EntryKind,
    /// Present for files only.
    pub size: Option<u64>,
}

impl FileSystemEntry {
    /// Convert to the wire representation.
    pub fn to_protocol(&self) -> FileEntry {
        match self.kind {
            EntryKind::Directory => FileEntry::directory(&self.name),
            EntryKind::File => FileEntry::file(&self.name, self.size.unwrap_or(0)),
        }
    }
}

/// Capacity of the mounted volume in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub total: u64,
    pub free: u64,
}

/// Hierarchical byte store the gateway serves.
///
/// All paths are [`StoragePath`]s, so implementations never see `..`.
pub trait Storage: Send + Sync {
    type Reader: Read + Send;
    type Writer: Write + Send;

    /// Open an existing file for reading.
    fn open_read(&self, path: &StoragePath) -> io::Result<Self::Reader>;

    /// Create a file for writing, truncating any existing file.
    fn create(&self, path: &StoragePath) -> io::Result<Self::Writer>;

    /// Metadata for a file or directory.
    fn stat(&self, path: &StoragePath) -> io::Result<EntryMeta>;

    /// Direct children of a directory.
    fn list(&self, path: &StoragePath) -> io::Result<Vec<FileSystemEntry>>;

    /// Atomically replace `to` with the file at `from`.
    fn rename(&self, from: &StoragePath, to: &StoragePath) -> io::Result<()>;

    /// Remove a file.
    fn remove_file(&self, path: &StoragePath) -> io::Result<()>;

    /// Create a single directory whose parent exists.
    fn create_dir(&self, path: &StoragePath) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &StoragePath) -> io::Result<()>;

    /// Total and free bytes of the volume.
    fn usage(&self) -> io::Result<StorageUsage>;
}

/// [`Storage`] backed by a host directory.
#[derive(Debug, Clone)]
pub struct MountedStorage {
    root: PathBuf,
}

impl MountedStorage {
    /// Mount `root`, which must be an existing directory.
    pub fn mount(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let metadata = fs::metadata(root)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("storage root {} is not a directory", root.display()),
            ));
        }
        debug!(root = %root.display(), "Mounted storage");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Host directory backing the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &StoragePath) -> PathBuf {
        self.root.join(path.to_relative())
    }
}

/// Describe a host entry from its non-following metadata.
///
/// Symlinks are never directories, so recursive walks unlink them instead
/// of descending. A link to a file reports the target's size.
fn describe(host: &Path, metadata: &fs::Metadata) -> EntryMeta {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        return EntryMeta {
            kind: EntryKind::Directory,
            size: 0,
        };
    }

    let size = if file_type.is_symlink() {
        fs::metadata(host)
            .ok()
            .filter(|target| target.is_file())
            .map_or(0, |target| target.len())
    } else {
        metadata.len()
    };
    EntryMeta {
        kind: EntryKind::File,
        size,
    }
}

impl Storage for MountedStorage {
    type Reader = File;
    type Writer = File;

    fn open_read(&self, path: &StoragePath) -> io::Result<File> {
        File::open(self.resolve(path))
    }

    fn create(&self, path: &StoragePath) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(path))
    }

    fn stat(&self, path: &StoragePath) -> io::Result<EntryMeta> {
        let host = self.resolve(path);
        // The mount point itself may be a link
        let metadata = if path.is_root() {
            fs::metadata(&host)?
        } else {
            fs::symlink_metadata(&host)?
        };
        Ok(describe(&host, &metadata))
    }

    fn list(&self, path: &StoragePath) -> io::Result<Vec<FileSystemEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!(name = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let meta = describe(&entry.path(), &metadata);
            entries.push(FileSystemEntry {
                name,
                kind: meta.kind,
                size: (!meta.is_dir()).then_some(meta.size),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn rename(&self, from: &StoragePath, to: &StoragePath) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    fn remove_file(&self, path: &StoragePath) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn create_dir(&self, path: &StoragePath) -> io::Result<()> {
        fs::create_dir(self.resolve(path))
    }

    fn remove_dir(&self, path: &StoragePath) -> io::Result<()> {
        fs::remove_dir(self.resolve(path))
    }

    #[cfg(unix)]
    fn usage(&self) -> io::Result<StorageUsage> {
        let stat = nix::sys::statvfs::statvfs(&self.root).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        Ok(StorageUsage {
            total: (stat.blocks() as u64).saturating_mul(fragment),
            free: (stat.blocks_available() as u64).saturating_mul(fragment),
        })
    }

    #[cfg(not(unix))]
    fn usage(&self) -> io::Result<StorageUsage> {
        Ok(StorageUsage::default())
    }
}
