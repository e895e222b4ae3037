//! Scripted in-memory [`Transport`].
//!
//! The request side is a queue of [`Incoming`] events replayed by `recv`, so
//! split deliveries, stalls and disconnects can be reproduced exactly. The
//! response side is recorded for inspection.

use std::collections::VecDeque;
use std::io;

use serde::de::DeserializeOwned;

use super::{Method, RecvError, Transport};

/// One scripted event on the request body stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Bytes delivered by the next read(s).
    Data(Vec<u8>),
    /// The next read times out.
    Timeout,
    /// The peer goes away.
    Disconnect,
}

/// In-memory request/response exchange.
#[derive(Debug)]
pub struct MemoryTransport {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    content_length: u64,
    incoming: VecDeque<Incoming>,
    status: u16,
    response_headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunks: usize,
    terminated: bool,
    sends: usize,
    fail_sends_after: Option<usize>,
}

impl MemoryTransport {
    /// Request for `target`, which may carry a query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: Vec::new(),
            content_length: 0,
            incoming: VecDeque::new(),
            status: 200,
            response_headers: Vec::new(),
            body: Vec::new(),
            chunks: 0,
            terminated: false,
            sends: 0,
            fail_sends_after: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Declare a body length without queueing any data.
    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = length;
        self
    }

    /// Whole body delivered as one event.
    pub fn with_body(self, body: impl Into<Vec<u8>>) -> Self {
        self.with_chunks(vec![body.into()])
    }

    /// Body delivered as the given pieces; the declared length is their sum.
    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.content_length = chunks.iter().map(|c| c.len() as u64).sum();
        self.incoming.extend(chunks.into_iter().map(Incoming::Data));
        self
    }

    /// Append one scripted event.
    pub fn push(mut self, event: Incoming) -> Self {
        self.incoming.push_back(event);
        self
    }

    /// Make every send after the first `count` fail with a broken pipe.
    pub fn fail_sends_after(mut self, count: usize) -> Self {
        self.fail_sends_after = Some(count);
        self
    }

    /// Recorded response status.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Recorded response header by case-insensitive name.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Recorded response body, chunks concatenated.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Recorded body parsed as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Number of non-empty chunks sent.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Whether a chunked response was properly ended.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn check_send(&mut self) -> io::Result<()> {
        self.sends += 1;
        match self.fail_sends_after {
            Some(limit) if self.sends > limit => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client went away",
            )),
            _ => Ok(()),
        }
    }
}

impl Transport for MemoryTransport {
    fn method(&self) -> Method {
        self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> u64 {
        self.content_length
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        match self.incoming.pop_front() {
            None => Ok(0),
            Some(Incoming::Timeout) => Err(RecvError::Timeout),
            Some(Incoming::Disconnect) => Err(RecvError::Closed),
            Some(Incoming::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.incoming.push_front(Incoming::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.response_headers
            .push((name.to_string(), value.to_string()));
    }

    async fn send(&mut self, body: &[u8]) -> io::Result<()> {
        self.check_send()?;
        self.body.extend_from_slice(body);
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.check_send()?;
        if chunk.is_empty() {
            self.terminated = true;
        } else {
            self.chunks += 1;
            self.body.extend_from_slice(chunk);
        }
        Ok(())
    }
}
