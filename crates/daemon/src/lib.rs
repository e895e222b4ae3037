//! # PaperDrop Daemon Library
//!
//! This crate provides the HTTP file-transfer gateway of an e-paper reader:
//! a small REST API that lets a browser-based companion tool browse the SD
//! card, push books onto it and pull files off it over WiFi.
//!
//! ## Overview
//!
//! - **Request Router**: matches (method, path) to a handler and answers CORS
//!   preflights
//! - **Transfer Engine**: streams single-file downloads and uploads through
//!   one fixed buffer, never leaving a truncated upload behind
//! - **Multipart Batch Upload**: demultiplexes one streamed body into many
//!   files, creating subdirectories as needed
//! - **Directory Operator**: recursive create and post-order recursive delete
//!   with protected roots
//! - **Response Formatter**: JSON success bodies and the error envelope
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FileServer                           │
//! │      (tokio TcpListener + hyper, one request at a time)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HttpConnection ──► ApiRouter ──► handlers ──► response     │
//! │                        │                                    │
//! │     ┌──────────────────┼───────────────────┐                │
//! │     ▼                  ▼                   ▼                │
//! │  transfer           batch               dirs / browser      │
//! │  (TransferBuffer)   (MultipartDecoder)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Storage (MountedStorage)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, FileServer, MountedStorage, NetworkStatusHandle};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let storage = MountedStorage::mount(&config.storage.root)?;
//!
//!     let mut server = FileServer::bind(&config, storage, NetworkStatusHandle::default()).await?;
//!     println!("Serving at {}", server.server_url());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Storage access, transfers, batch uploads, directory operations
//! - [`network`]: Transport abstraction, HTTP connection, accept loop
//! - [`router`]: Request routing to handlers
//! - [`response`]: JSON responses, CORS and the error type

pub mod config;
pub mod files;
pub mod network;
pub mod response;
pub mod router;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export files types for convenience
pub use files::{MountedStorage, Storage, StoragePath, TransferBuffer};

// Re-export network types for convenience
pub use network::{
    FileServer, HttpConnection, Incoming, MemoryTransport, Method, NetworkStatus,
    NetworkStatusHandle, RecvError, RequestHandler, Transport,
};

// Re-export router and response types for convenience
pub use response::GatewayError;
pub use router::{ApiRouter, GatewaySettings, Route};
