//! File module for storage access and transfers.
//!
//! This module provides the storage-facing half of the gateway:
//! - Validated storage paths that cannot escape the mount
//! - The storage abstraction and its host-directory implementation
//! - Directory listing, recursive creation and removal
//! - Streaming single-file downloads and uploads
//! - Multipart batch uploads
//!
//! # Safety of partial writes
//!
//! Every file being written is held by a [`PartialFile`] that stages the
//! bytes in a hidden sibling and renames it onto the target on commit. A
//! failed or cut-off upload never leaves a truncated file on the card and
//! never clobbers the file it was replacing.

pub mod batch;
pub mod browser;
pub mod dirs;
pub mod path;
pub mod storage;
pub mod transfer;

pub use batch::{receive_batch, BatchOutcome, BatchWriter};
pub use browser::DirectoryBrowser;
pub use dirs::{create_dir_all, remove_dir_all, ProtectedPathError, ProtectedPaths, RemovalReport};
pub use path::{PathError, StoragePath};
pub use storage::{EntryKind, EntryMeta, FileSystemEntry, MountedStorage, Storage, StorageUsage};
pub use transfer::{receive_file, send_file, PartialFile, TransferBuffer, UploadCursor};
