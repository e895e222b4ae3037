//! REST body definitions for PaperDrop.
//!
//! Every JSON body exchanged with the companion web tool is defined here.
//! Success bodies always carry `success: true`; error bodies always carry
//! `error: true` plus a numeric `code` mirroring the HTTP status.

use serde::{Deserialize, Serialize};

/// Closed set of failure categories surfaced to clients.
///
/// The mapping to HTTP status codes is fixed and lives only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid parameter, malformed body, protected path.
    BadRequest,
    /// The addressed file, directory or route does not exist.
    NotFound,
    /// The route exists but not for this method.
    MethodNotAllowed,
    /// The storage layer failed to open, write, delete or create.
    StorageFailure,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::StorageFailure => 500,
        }
    }
}

/// Error envelope returned by any endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always `true`.
    pub error: bool,
    /// HTTP status code.
    pub code: u16,
    /// Short human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Create an error body for the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: true,
            code: kind.status(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Directory listing
// ============================================================================

/// Type of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// A single entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub entry_type: FileEntryType,
    /// Size in bytes, present for files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileEntry {
    /// A file entry with its size.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            entry_type: FileEntryType::File,
            size: Some(size),
        }
    }

    /// A directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: FileEntryType::Directory,
            size: None,
        }
    }
}

/// Response to `GET /api/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// The listed path as requested.
    pub path: String,
    /// Directory contents.
    pub items: Vec<FileEntry>,
}

// ============================================================================
// Mutations
// ============================================================================

/// Response to a single-file upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWritten {
    /// Always `true`.
    pub success: bool,
    /// Target path as requested.
    pub path: String,
    /// Bytes written.
    pub size: u64,
}

impl FileWritten {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            success: true,
            path: path.into(),
            size,
        }
    }
}

/// Response to delete, mkdir and rmdir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResult {
    /// Always `true`.
    pub success: bool,
    /// Affected path as requested.
    pub path: String,
}

impl PathResult {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            success: true,
            path: path.into(),
        }
    }
}

/// Response to `POST /api/upload-batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUploadResult {
    /// Always `true`; per-file failures never fail the batch.
    pub success: bool,
    /// Names of the parts that were fully written and closed, in body order.
    pub files: Vec<String>,
    /// Equal to `files.len()`.
    pub count: usize,
    /// Names of the parts whose file could not be opened or written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl BatchUploadResult {
    pub fn new(files: Vec<String>, skipped: Vec<String>) -> Self {
        Self {
            success: true,
            count: files.len(),
            files,
            skipped,
        }
    }
}

// ============================================================================
// Device information
// ============================================================================

/// WiFi association summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiInfo {
    /// Associated SSID, `"unknown"` when not associated.
    pub ssid: String,
    /// Signal strength in dBm, 0 when unknown.
    pub rssi: i32,
}

/// Storage capacity summary in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl StorageInfo {
    /// Build from total and free byte counts.
    pub fn from_usage(total: u64, free: u64) -> Self {
        Self {
            total,
            free,
            used: total.saturating_sub(free),
        }
    }
}

/// Response to `GET /api/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfoResponse {
    /// Device model name.
    pub device: String,
    /// Station IP address, `"unknown"` when unavailable.
    pub ip: String,
    pub wifi: WifiInfo,
    pub storage: StorageInfo,
}
