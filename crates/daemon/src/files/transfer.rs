//! Single-file transfer engine.
//!
//! This module moves file bytes between a [`Transport`] and a [`Storage`]
//! through one reusable [`TransferBuffer`]:
//! - Downloads stream the file as a chunked response
//! - Uploads read exactly the declared body length into a [`PartialFile`]
//!
//! A [`PartialFile`] writes to a hidden sibling and only renames it onto the
//! target on commit. Dropping it uncommitted deletes the sibling, so every
//! early return on an upload path leaves nothing half-written behind and the
//! previous file, if any, untouched.

use std::io::{self, Read, Write};

use protocol::mime;
use tracing::{debug, error, info, warn};

use super::path::StoragePath;
use super::storage::Storage;
use crate::network::{recv_retrying, Transport};
use crate::response::GatewayError;

/// Default transfer buffer size (16KB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Smallest accepted transfer buffer (1KB).
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Largest accepted transfer buffer (1MB).
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Scratch buffer shared by all transfers of one server.
///
/// Requests are served one at a time, so a single allocation is reused for
/// every download, upload and multipart decode.
#[derive(Debug)]
pub struct TransferBuffer {
    data: Box<[u8]>,
}

impl TransferBuffer {
    /// Allocate a buffer, clamping `capacity` to the accepted range.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for TransferBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

/// A file being written that is removed unless committed.
pub struct PartialFile<'a, S: Storage> {
    storage: &'a S,
    path: StoragePath,
    staging: StoragePath,
    writer: Option<S::Writer>,
    committed: bool,
}

impl<'a, S: Storage> PartialFile<'a, S> {
    /// Start writing `path`. The file appears there only on [`commit`](Self::commit).
    pub fn create(storage: &'a S, path: &StoragePath) -> io::Result<Self> {
        if storage.stat(path).is_ok_and(|meta| meta.is_dir()) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path),
            ));
        }
        let staging = staging_path(path)?;
        let writer = storage.create(&staging)?;
        Ok(Self {
            storage,
            path: path.clone(),
            staging,
            writer: Some(writer),
            committed: false,
        })
    }

    pub fn path(&self) -> &StoragePath {
        &self.path
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_all(data),
            None => Err(io::Error::other("file already closed")),
        }
    }

    /// Flush and close the file, then move it onto the target path.
    pub fn commit(mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        self.storage.rename(&self.staging, &self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl<S: Storage> Drop for PartialFile<'_, S> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close before removing
        drop(self.writer.take());
        match self.storage.remove_file(&self.staging) {
            Ok(()) => debug!(path = %self.path, "Removed incomplete file"),
            Err(e) => warn!(path = %self.staging, error = %e, "Failed to remove incomplete file"),
        }
    }
}

/// Hidden sibling that receives the bytes of `path` until commit.
fn staging_path(path: &StoragePath) -> io::Result<StoragePath> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot write to the storage root",
        ));
    };
    parent
        .join(&format!(".{}.partial", name))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Progress of a single-file upload.
pub struct UploadCursor<'a, S: Storage> {
    remaining: u64,
    written: u64,
    target: PartialFile<'a, S>,
}

impl<'a, S: Storage> UploadCursor<'a, S> {
    pub fn new(target: PartialFile<'a, S>, declared: u64) -> Self {
        Self {
            remaining: declared,
            written: 0,
            target,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Size of the next read for a buffer of `capacity` bytes.
    pub fn window(&self, capacity: usize) -> usize {
        self.remaining.min(capacity as u64) as usize
    }

    /// Write a received block.
    pub fn accept(&mut self, data: &[u8]) -> io::Result<()> {
        self.target.write_all(data)?;
        let len = data.len() as u64;
        self.written += len;
        self.remaining = self.remaining.saturating_sub(len);
        Ok(())
    }

    /// Commit the file and return its size.
    pub fn finish(self) -> io::Result<u64> {
        let written = self.written;
        self.target.commit()?;
        Ok(written)
    }
}

/// Stream `path` to the client as a chunked download.
///
/// Returns the number of bytes sent. Errors are only returned before the
/// response starts; later failures cut the response short.
pub async fn send_file<S: Storage, T: Transport>(
    storage: &S,
    transport: &mut T,
    buffer: &mut TransferBuffer,
    path: &StoragePath,
) -> Result<u64, GatewayError> {
    let meta = storage
        .stat(path)
        .map_err(|e| GatewayError::from_io(e, "File not found", "Failed to open file"))?;
    if meta.is_dir() {
        return Err(GatewayError::bad_request("Path is a directory"));
    }
    let mut reader = storage
        .open_read(path)
        .map_err(|e| GatewayError::from_io(e, "File not found", "Failed to open file"))?;

    let display = path.to_string();
    transport.set_status(200);
    transport.set_header("Content-Type", mime::content_type_for(&display));
    transport.set_header(
        "Content-Disposition",
        &mime::attachment_disposition(&display),
    );

    let buf = buffer.as_mut_slice();
    let mut sent = 0u64;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Leave the chunked body unterminated so the client sees the cut
                error!(path = %path, error = %e, sent, "Failed to read file during download");
                return Ok(sent);
            }
        };
        if let Err(e) = transport.send_chunk(&buf[..n]).await {
            warn!(path = %path, error = %e, sent, "Client stopped receiving download");
            return Ok(sent);
        }
        sent += n as u64;
    }

    if let Err(e) = transport.send_chunk(&[]).await {
        warn!(path = %path, error = %e, "Failed to end download");
    }
    info!(path = %path, size = sent, "File downloaded");
    Ok(sent)
}

/// Store the request body at `path`.
///
/// Exactly `content_length` bytes are read. On success the file holds the
/// full body; on any failure the partial file is removed.
pub async fn receive_file<S: Storage, T: Transport>(
    storage: &S,
    transport: &mut T,
    buffer: &mut TransferBuffer,
    path: &StoragePath,
    max_read_retries: u32,
) -> Result<u64, GatewayError> {
    let declared = transport.content_length();
    let target = PartialFile::create(storage, path)
        .map_err(|e| GatewayError::storage("Failed to create file", e))?;
    let mut cursor = UploadCursor::new(target, declared);
    debug!(path = %path, declared, "Receiving file");

    let buf = buffer.as_mut_slice();
    while !cursor.is_complete() {
        let window = cursor.window(buf.len());
        let received = match recv_retrying(transport, &mut buf[..window], max_read_retries).await {
            Ok(0) => {
                warn!(path = %path, remaining = cursor.remaining(), "Request body ended early");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(path = %path, error = %e, remaining = cursor.remaining(), "Failed to receive data");
                break;
            }
        };
        cursor
            .accept(&buf[..received])
            .map_err(|e| GatewayError::storage("Failed to write data", e))?;
    }

    if !cursor.is_complete() {
        return Err(GatewayError::IncompleteUpload {
            expected: declared,
            received: cursor.written(),
        });
    }

    let size = cursor
        .finish()
        .map_err(|e| GatewayError::storage("Failed to write data", e))?;
    info!(path = %path, size, "File uploaded");
    Ok(size)
}


#[cfg(test)]
mod tests {
    use super::test_support::FlakyStorage;
    use super::*;
    use crate::files::storage::MountedStorage;
    use crate::network::{Incoming, MemoryTransport, Method};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn path(raw: &str) -> StoragePath {
        StoragePath::parse(raw).unwrap()
    }

    // ========================================================================
    // TransferBuffer
    // ========================================================================

    #[test]
    fn test_buffer_capacity_clamped() {
        assert_eq!(TransferBuffer::new(10).capacity(), MIN_BUFFER_SIZE);
        assert_eq!(TransferBuffer::new(usize::MAX).capacity(), MAX_BUFFER_SIZE);
        assert_eq!(TransferBuffer::default().capacity(), DEFAULT_BUFFER_SIZE);
    }

    // ========================================================================
    // PartialFile
    // ========================================================================

    #[test]
    fn test_partial_file_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();

        let mut file = PartialFile::create(&storage, &path("/part.bin")).unwrap();
        file.write_all(b"half").unwrap();
        assert!(temp_dir.path().join(".part.bin.partial").exists());
        assert!(!temp_dir.path().join("part.bin").exists());
        drop(file);

        assert!(!temp_dir.path().join(".part.bin.partial").exists());
        assert!(!temp_dir.path().join("part.bin").exists());
    }

    #[test]
    fn test_partial_file_keeps_previous_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(temp_dir.path(), "a.txt", b"previous");
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();

        let mut file = PartialFile::create(&storage, &path("/a.txt")).unwrap();
        file.write_all(b"next").unwrap();
        assert_eq!(fs::read(temp_dir.path().join("a.txt")).unwrap(), b"previous");
        drop(file);
        assert_eq!(fs::read(temp_dir.path().join("a.txt")).unwrap(), b"previous");

        let mut file = PartialFile::create(&storage, &path("/a.txt")).unwrap();
        file.write_all(b"next").unwrap();
        file.commit().unwrap();
        assert_eq!(fs::read(temp_dir.path().join("a.txt")).unwrap(), b"next");
        assert!(!temp_dir.path().join(".a.txt.partial").exists());
    }

    #[test]
    fn test_partial_file_rejects_directory_and_root() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("books")).unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();

        let err = PartialFile::create(&storage, &path("/books")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
        assert!(PartialFile::create(&storage, &StoragePath::root()).is_err());
        assert!(temp_dir.path().join("books").is_dir());
    }

    #[test]
    fn test_partial_file_kept_on_commit() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();

        let mut file = PartialFile::create(&storage, &path("/done.bin")).unwrap();
        file.write_all(b"whole").unwrap();
        file.commit().unwrap();

        assert_eq!(fs::read(temp_dir.path().join("done.bin")).unwrap(), b"whole");
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    #[tokio::test]
    async fn test_download_entire_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(temp_dir.path(), "notes.txt", b"Hello, World!");
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Get, "/api/file?path=/notes.txt");

        let sent = send_file(&storage, &mut transport, &mut buffer, &path("/notes.txt"))
            .await
            .unwrap();

        assert_eq!(sent, 13);
        assert_eq!(transport.status(), 200);
        assert_eq!(transport.body(), b"Hello, World!");
        assert!(transport.is_terminated());
        assert_eq!(transport.response_header("Content-Type"), Some("text/plain"));
        assert_eq!(
            transport.response_header("Content-Disposition"),
            Some("attachment; filename=\"notes.txt\"")
        );
    }

    #[tokio::test]
    async fn test_download_in_buffer_sized_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        create_test_file(temp_dir.path(), "book.epub", &content);
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::new(MIN_BUFFER_SIZE);
        let mut transport = MemoryTransport::new(Method::Get, "/api/file");

        send_file(&storage, &mut transport, &mut buffer, &path("/book.epub"))
            .await
            .unwrap();

        assert_eq!(transport.body(), content.as_slice());
        assert_eq!(transport.chunk_count(), 5);
        assert_eq!(
            transport.response_header("Content-Type"),
            Some("application/epub+zip")
        );
    }

    #[tokio::test]
    async fn test_download_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(temp_dir.path(), "empty.bin", b"");
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Get, "/api/file");

        let sent = send_file(&storage, &mut transport, &mut buffer, &path("/empty.bin"))
            .await
            .unwrap();

        assert_eq!(sent, 0);
        assert_eq!(transport.chunk_count(), 0);
        assert!(transport.is_terminated());
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Get, "/api/file");

        let result = send_file(&storage, &mut transport, &mut buffer, &path("/nope.txt")).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        assert!(transport.body().is_empty());
    }

    #[tokio::test]
    async fn test_download_is_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("subdir")).unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Get, "/api/file");

        let result = send_file(&storage, &mut transport, &mut buffer, &path("/subdir")).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_download_client_disconnect_stops_stream() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(temp_dir.path(), "big.bin", &vec![1u8; 4 * MIN_BUFFER_SIZE]);
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::new(MIN_BUFFER_SIZE);
        let mut transport = MemoryTransport::new(Method::Get, "/api/file").fail_sends_after(2);

        let sent = send_file(&storage, &mut transport, &mut buffer, &path("/big.bin"))
            .await
            .unwrap();

        assert_eq!(sent, 2 * MIN_BUFFER_SIZE as u64);
        assert!(!transport.is_terminated());
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    #[tokio::test]
    async fn test_upload_complete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport =
            MemoryTransport::new(Method::Post, "/api/file?path=/test.txt").with_body("Hello, World!");

        let size = receive_file(&storage, &mut transport, &mut buffer, &path("/test.txt"), 3)
            .await
            .unwrap();

        assert_eq!(size, 13);
        assert_eq!(
            fs::read(temp_dir.path().join("test.txt")).unwrap(),
            b"Hello, World!"
        );
    }

    #[tokio::test]
    async fn test_upload_replaces_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(temp_dir.path(), "a.txt", b"a much longer previous body");
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file").with_body("new");

        receive_file(&storage, &mut transport, &mut buffer, &path("/a.txt"), 3)
            .await
            .unwrap();
        assert_eq!(fs::read(temp_dir.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_upload_empty_body() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file");

        let size = receive_file(&storage, &mut transport, &mut buffer, &path("/empty.txt"), 3)
            .await
            .unwrap();
        assert_eq!(size, 0);
        assert_eq!(fs::metadata(temp_dir.path().join("empty.txt")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_upload_split_across_reads_with_stalls() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::new(MIN_BUFFER_SIZE);
        let content: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file")
            .with_content_length(content.len() as u64)
            .push(Incoming::Data(content[..100].to_vec()))
            .push(Incoming::Timeout)
            .push(Incoming::Data(content[100..2500].to_vec()))
            .push(Incoming::Timeout)
            .push(Incoming::Timeout)
            .push(Incoming::Data(content[2500..].to_vec()));

        let size = receive_file(&storage, &mut transport, &mut buffer, &path("/x.bin"), 2)
            .await
            .unwrap();

        assert_eq!(size, 3000);
        assert_eq!(fs::read(temp_dir.path().join("x.bin")).unwrap(), content);
    }

    #[tokio::test]
    async fn test_upload_truncated_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file")
            .with_content_length(10_000)
            .push(Incoming::Data(vec![0u8; 4000]))
            .push(Incoming::Disconnect);

        let result = receive_file(&storage, &mut transport, &mut buffer, &path("/big.bin"), 3).await;

        assert!(matches!(
            result,
            Err(GatewayError::IncompleteUpload {
                expected: 10_000,
                received: 4000
            })
        ));
        assert!(!temp_dir.path().join("big.bin").exists());
        assert!(!temp_dir.path().join(".big.bin.partial").exists());
    }

    #[tokio::test]
    async fn test_upload_truncated_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(temp_dir.path(), "book.epub", b"intact previous copy");
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file")
            .with_content_length(500)
            .push(Incoming::Data(vec![7u8; 200]))
            .push(Incoming::Disconnect);

        let result =
            receive_file(&storage, &mut transport, &mut buffer, &path("/book.epub"), 3).await;

        assert!(matches!(result, Err(GatewayError::IncompleteUpload { .. })));
        assert_eq!(
            fs::read(temp_dir.path().join("book.epub")).unwrap(),
            b"intact previous copy"
        );
        assert!(!temp_dir.path().join(".book.epub.partial").exists());
    }

    #[tokio::test]
    async fn test_upload_gives_up_after_timeouts() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file")
            .with_content_length(10)
            .push(Incoming::Timeout)
            .push(Incoming::Timeout)
            .push(Incoming::Data(vec![0u8; 10]));

        let result = receive_file(&storage, &mut transport, &mut buffer, &path("/slow.bin"), 1).await;

        assert!(matches!(result, Err(GatewayError::IncompleteUpload { .. })));
        assert!(!temp_dir.path().join("slow.bin").exists());
    }

    #[tokio::test]
    async fn test_upload_write_failure_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FlakyStorage {
            inner: MountedStorage::mount(temp_dir.path()).unwrap(),
            write_budget: 100,
        };
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file").with_body(vec![9u8; 500]);

        let result = receive_file(&storage, &mut transport, &mut buffer, &path("/full.bin"), 3).await;

        match result {
            Err(err @ GatewayError::Storage { .. }) => {
                assert_eq!(err.to_string(), "Failed to write data")
            }
            other => panic!("expected storage failure, got {:?}", other),
        }
        assert!(!temp_dir.path().join("full.bin").exists());
    }

    #[tokio::test]
    async fn test_upload_into_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let storage = MountedStorage::mount(temp_dir.path()).unwrap();
        let mut buffer = TransferBuffer::default();
        let mut transport = MemoryTransport::new(Method::Post, "/api/file").with_body("x");

        let result =
            receive_file(&storage, &mut transport, &mut buffer, &path("/no/such/dir.txt"), 3).await;
        assert!(matches!(result, Err(GatewayError::Storage { .. })));
    }
}
