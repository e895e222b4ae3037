//! # PaperDrop Protocol Library
//!
//! This crate defines the wire contract between the e-paper reader's file
//! gateway and the companion web tool that pushes books onto the device.
//!
//! ## Overview
//!
//! - **REST Bodies**: JSON success and error envelopes for every endpoint
//! - **Error Kinds**: the closed set of failure categories and their fixed
//!   HTTP status mapping
//! - **Multipart Decoder**: a push-driven `multipart/form-data` state machine
//!   that demultiplexes one streamed body into any number of files without
//!   buffering it
//! - **Content Types**: extension-based content-type inference for downloads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        JSON bodies (messages)           │  serde
//! ├─────────────────────────────────────────┤
//! │   multipart decoder   │   mime table    │  I/O free
//! ├─────────────────────────────────────────┤
//! │     HTTP transport (daemon crate)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::multipart::{MultipartDecoder, PartSink};
//!
//! struct Names(Vec<String>);
//!
//! impl PartSink for Names {
//!     fn open_part(&mut self, filename: &str) -> bool {
//!         self.0.push(filename.to_string());
//!         true
//!     }
//!     fn write_part(&mut self, _data: &[u8]) -> bool { true }
//!     fn close_part(&mut self) {}
//!     fn discard_part(&mut self) {}
//! }
//!
//! let mut decoder =
//!     MultipartDecoder::from_content_type("multipart/form-data; boundary=XYZ").unwrap();
//! let mut sink = Names(Vec::new());
//! let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\nA\r\n--XYZ--\r\n";
//! decoder.feed(&body[..20], &mut sink).unwrap();
//! decoder.feed(&body[20..], &mut sink).unwrap();
//! assert!(decoder.finish(&mut sink));
//! assert_eq!(sink.0, vec!["a.txt"]);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: REST body definitions and error kinds
//! - [`multipart`]: Streaming multipart decoder
//! - [`mime`]: Content-type table
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod mime;
pub mod multipart;

pub use error::{ProtocolError, Result};
pub use messages::{
    BatchUploadResult, DeviceInfoResponse, ErrorBody, ErrorKind, FileEntry, FileEntryType,
    FileWritten, ListResponse, PathResult, StorageInfo, WifiInfo,
};
pub use multipart::{MultipartDecoder, PartSink, Phase, MAX_BOUNDARY_LEN, MAX_HEADER_LEN};
