//! Multipart batch upload.
//!
//! [`BatchWriter`] is the [`PartSink`] that turns decoded parts into files
//! below a base directory. [`receive_batch`] drives the decoder with the
//! request body.

use protocol::{MultipartDecoder, PartSink};
use tracing::{debug, error, info, warn};

use super::dirs::create_dir_all;
use super::path::StoragePath;
use super::storage::Storage;
use super::transfer::{PartialFile, TransferBuffer};
use crate::network::{recv_retrying, Transport};

/// Result of a batch upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Parts fully written, in body order, as named by the client.
    pub files: Vec<String>,
    /// Parts that could not be stored.
    pub skipped: Vec<String>,
    /// Whether the terminal delimiter was seen.
    pub terminated: bool,
    /// Body bytes consumed.
    pub received: u64,
}

/// Writes decoded parts below a base directory.
pub struct BatchWriter<'a, S: Storage> {
    storage: &'a S,
    base: StoragePath,
    current: Option<(String, PartialFile<'a, S>)>,
    files: Vec<String>,
    skipped: Vec<String>,
}

impl<'a, S: Storage> BatchWriter<'a, S> {
    pub fn new(storage: &'a S, base: StoragePath) -> Self {
        Self {
            storage,
            base,
            current: None,
            files: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Names of the parts written so far.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Names of the parts skipped so far.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Consume the writer, returning written and skipped names.
    pub fn into_results(self) -> (Vec<String>, Vec<String>) {
        (self.files, self.skipped)
    }

    fn skip(&mut self, filename: &str) -> bool {
        self.skipped.push(filename.to_string());
        false
    }
}

impl<S: Storage> PartSink for BatchWriter<'_, S> {
    fn open_part(&mut self, filename: &str) -> bool {
        let target = match self.base.join(filename) {
            Ok(target) if target.file_name().is_some() && target != self.base => target,
            Ok(_) => {
                warn!(filename = %filename, "Skipping part without a file name");
                return self.skip(filename);
            }
            Err(e) => {
                warn!(filename = %filename, error = %e, "Skipping part with unsafe file name");
                return self.skip(filename);
            }
        };

        if let Some(parent) = target.parent() {
            if let Err(e) = create_dir_all(self.storage, &parent) {
                error!(path = %parent, error = %e, "Failed to create parent directory");
                return self.skip(filename);
            }
        }

        match PartialFile::create(self.storage, &target) {
            Ok(file) => {
                debug!(path = %target, "Receiving part");
                self.current = Some((filename.to_string(), file));
                true
            }
            Err(e) => {
                error!(path = %target, error = %e, "Failed to create file");
                self.skip(filename)
            }
        }
    }

    fn write_part(&mut self, data: &[u8]) -> bool {
        let Some((name, file)) = self.current.as_mut() else {
            return false;
        };
        match file.write_all(data) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %file.path(), error = %e, "Failed to write part");
                let name = name.clone();
                // Dropping the uncommitted file removes it
                self.current = None;
                self.skip(&name)
            }
        }
    }

    fn close_part(&mut self) {
        let Some((name, file)) = self.current.take() else {
            return;
        };
        let path = file.path().clone();
        match file.commit() {
            Ok(()) => {
                info!(path = %path, "File uploaded");
                self.files.push(name);
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to close file");
                self.skipped.push(name);
            }
        }
    }

    fn discard_part(&mut self) {
        if let Some((name, file)) = self.current.take() {
            warn!(path = %file.path(), "Discarding part cut off by end of body");
            drop(file);
            self.skipped.push(name);
        }
    }
}

/// Decode the multipart request body into files below `base`.
///
/// Per-part failures are recorded in the outcome and never abort the batch.
/// A body that ends early keeps the parts completed before the cut.
pub async fn receive_batch<S: Storage, T: Transport>(
    storage: &S,
    transport: &mut T,
    buffer: &mut TransferBuffer,
    base: &StoragePath,
    decoder: MultipartDecoder,
    max_read_retries: u32,
) -> BatchOutcome {
    let declared = transport.content_length();
    let buf = buffer.as_mut_slice();
    let mut decoder = decoder.with_chunk_capacity(buf.len());
    let mut writer = BatchWriter::new(storage, base.clone());
    let mut remaining = declared;

    while remaining > 0 {
        let window = remaining.min(buf.len() as u64) as usize;
        let received = match recv_retrying(transport, &mut buf[..window], max_read_retries).await {
            Ok(0) => {
                warn!(remaining, "Request body ended early");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, remaining, "Failed to receive data");
                break;
            }
        };
        remaining -= received as u64;

        if let Err(e) = decoder.feed(&buf[..received], &mut writer) {
            warn!(error = %e, "Stopped decoding multipart body");
            break;
        }
    }

    let terminated = decoder.finish(&mut writer);
    if !terminated {
        warn!("Multipart body ended without closing delimiter");
    }

    let (files, skipped) = writer.into_results();
    info!(
        dir = %base,
        count = files.len(),
        skipped = skipped.len(),
        "Batch upload finished"
    );

    BatchOutcome {
        files,
        skipped,
        terminated,
        received: declared - remaining,
    }
}
