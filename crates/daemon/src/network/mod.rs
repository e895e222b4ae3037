//! Network module for the HTTP gateway.
//!
//! This module provides:
//! - The [`Transport`] abstraction over one HTTP request/response exchange
//! - [`HttpConnection`]: the transport for requests served by hyper
//! - [`MemoryTransport`]: a scripted in-memory transport
//! - [`FileServer`]: the accept loop serving one connection at a time

pub mod http;
pub mod memory;
pub mod server;

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    /// Any method the gateway does not know about.
    Other,
}

impl Method {
    /// Parse a request-line method token.
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other => "OTHER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single body read.
#[derive(Debug, Error)]
pub enum RecvError {
    /// No data arrived within the read timeout. The read may be retried.
    #[error("timed out waiting for request body")]
    Timeout,

    /// The peer closed the connection before the body was complete.
    #[error("connection closed by peer")]
    Closed,

    /// Any other I/O failure.
    #[error("receive failed: {0}")]
    Io(#[from] io::Error),
}

/// One HTTP request/response exchange as seen by the handlers.
///
/// A response is either a single [`Transport::send`] or a sequence of
/// [`Transport::send_chunk`] calls ending with an empty chunk. Status and
/// headers must be set before the first byte of the body goes out.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Request method.
    fn method(&self) -> Method;

    /// Request path without the query string.
    fn path(&self) -> &str;

    /// Raw query string without the leading `?`.
    fn query(&self) -> Option<&str>;

    /// Request header by case-insensitive name.
    fn header(&self, name: &str) -> Option<&str>;

    /// Declared request body length, 0 when absent.
    fn content_length(&self) -> u64;

    /// Local address the request arrived on, if known.
    fn local_ip(&self) -> Option<IpAddr> {
        None
    }

    /// Read up to `buf.len()` body bytes.
    ///
    /// `Ok(0)` means the declared body has been fully consumed.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RecvError>;

    /// Set the response status code.
    fn set_status(&mut self, status: u16);

    /// Add a response header.
    fn set_header(&mut self, name: &str, value: &str);

    /// Send the whole response body in one piece.
    async fn send(&mut self, body: &[u8]) -> io::Result<()>;

    /// Send one piece of a chunked response. An empty slice ends the response.
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Percent-decoded query parameter value.
    fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// Something that answers requests arriving on a [`Transport`].
#[allow(async_fn_in_trait)]
pub trait RequestHandler {
    /// Serve one request to completion.
    async fn respond<T: Transport>(&mut self, transport: &mut T);
}

/// Read body bytes, retrying on timeouts.
///
/// Up to `max_retries` consecutive timeouts are tolerated before the timeout
/// is returned to the caller. `0` retries forever.
pub async fn recv_retrying<T: Transport>(
    transport: &mut T,
    buf: &mut [u8],
    max_retries: u32,
) -> Result<usize, RecvError> {
    let mut timeouts = 0u32;
    loop {
        match transport.recv(buf).await {
            Err(RecvError::Timeout) => {
                timeouts = timeouts.saturating_add(1);
                if max_retries != 0 && timeouts > max_retries {
                    return Err(RecvError::Timeout);
                }
                debug!(timeouts, "Body read timed out, retrying");
            }
            other => return other,
        }
    }
}

/// Station-side network state reported by the info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    /// Associated SSID.
    pub ssid: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i32,
    /// Station IP address.
    pub ip: Option<IpAddr>,
}

/// Shared, updatable [`NetworkStatus`].
///
/// The WiFi layer owns a clone and updates it on (re)association; the
/// gateway only takes snapshots.
#[derive(Debug, Clone, Default)]
pub struct NetworkStatusHandle {
    inner: Arc<RwLock<NetworkStatus>>,
}

impl NetworkStatusHandle {
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(status)),
        }
    }

    /// Replace the current status.
    pub fn update(&self, status: NetworkStatus) {
        match self.inner.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> NetworkStatus {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub use http::{serve_connection, HttpConnection};
pub use memory::{Incoming, MemoryTransport};
pub use server::{format_server_url, FileServer};
