//! Streaming `multipart/form-data` decoder.
//!
//! # Body Format
//!
//! ```text
//! --boundary\r\n
//! Content-Disposition: form-data; name="files"; filename="a.txt"\r\n
//! \r\n
//! <bytes>\r\n
//! --boundary\r\n
//! ...
//! --boundary--\r\n
//! ```
//!
//! # Streaming
//!
//! The decoder is push-driven: the caller feeds network chunks of any size
//! and alignment, and the decoder reports part lifecycle events to a
//! [`PartSink`]. It never holds the whole body. Between chunks it retains
//! only the bytes that could still turn out to be part of a delimiter:
//!
//! - while seeking a delimiter, the last `delimiter.len()` bytes;
//! - while streaming a part body, the last `delimiter.len() + 2` bytes
//!   (the `\r\n` preceding a delimiter belongs to the delimiter, not the file);
//! - while parsing part headers, the incomplete header block, capped at
//!   [`MAX_HEADER_LEN`].

use percent_encoding::percent_decode_str;

use crate::error::{ProtocolError, Result};

/// Maximum supported boundary length in bytes.
pub const MAX_BOUNDARY_LEN: usize = 128;

/// Maximum size of one part's header block.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

const BOUNDARY_PARAM: &str = "boundary=";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const LINE_END: &[u8] = b"\r\n";
const CLOSE_SUFFIX: &[u8] = b"--";

/// Extract the boundary parameter from a `Content-Type` value.
///
/// The parameter name is matched case-insensitively and the value may be
/// quoted. The returned string does not include the leading `--`.
pub fn extract_boundary(content_type: &str) -> Result<String> {
    let lower = content_type.to_ascii_lowercase();
    let start = lower
        .find(BOUNDARY_PARAM)
        .ok_or_else(|| ProtocolError::MissingBoundary(content_type.to_string()))?
        + BOUNDARY_PARAM.len();

    let raw = content_type[start..].split(';').next().unwrap_or("").trim();
    let boundary = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(raw);

    if boundary.is_empty() {
        return Err(ProtocolError::MissingBoundary(content_type.to_string()));
    }
    if boundary.len() > MAX_BOUNDARY_LEN {
        return Err(ProtocolError::BoundaryTooLong {
            len: boundary.len(),
            max: MAX_BOUNDARY_LEN,
        });
    }

    Ok(boundary.to_string())
}

/// Parse the percent-decoded `filename="..."` parameter out of a part's
/// header block. Returns `None` for form fields and empty names.
pub fn parse_filename(headers: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(headers);

    let disposition = text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(value)
    })?;

    let raw = filename_param(disposition)?;
    let decoded = percent_decode_str(raw).decode_utf8_lossy().into_owned();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

/// Locate the quoted `filename` parameter, ignoring e.g. `name=` or `filename*=`.
fn filename_param(disposition: &str) -> Option<&str> {
    const KEY: &str = "filename=\"";
    let lower = disposition.to_ascii_lowercase();
    let mut from = 0;

    while let Some(found) = lower[from..].find(KEY) {
        let at = from + found;
        let preceded_ok = at == 0
            || matches!(lower.as_bytes()[at - 1], b';' | b' ' | b'\t');
        let value_start = at + KEY.len();
        if preceded_ok {
            let len = disposition[value_start..].find('"')?;
            return Some(&disposition[value_start..value_start + len]);
        }
        from = value_start;
    }

    None
}

/// Receiver of decoded parts.
///
/// At most one part is open at any time: every `open_part` that returns
/// `true` is followed by exactly one `close_part` or `discard_part`, unless a
/// `write_part` call returns `false` first.
pub trait PartSink {
    /// A part with a filename begins. Return `false` to skip its body.
    fn open_part(&mut self, filename: &str) -> bool;

    /// Body bytes of the open part, in order.
    ///
    /// Return `false` when the bytes could not be stored. The sink must have
    /// released the part itself; the rest of its body is skipped.
    fn write_part(&mut self, data: &[u8]) -> bool;

    /// The open part's body ended at a delimiter.
    fn close_part(&mut self);

    /// The body ended while a part was still open.
    fn discard_part(&mut self);
}

/// Decoder position within the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Looking for the next delimiter (preamble, or between parts).
    SeekingBoundary,
    /// Delimiter consumed; waiting for the end of the part's header block.
    ParsingHeaders,
    /// Forwarding part body bytes until the next delimiter.
    StreamingBody,
    /// The terminal delimiter was seen or the decoder was finished.
    Finished,
}

/// Push-driven multipart decoder.
#[derive(Debug)]
pub struct MultipartDecoder {
    /// `--` followed by the boundary.
    delimiter: Vec<u8>,
    /// Unprocessed bytes carried between chunks.
    buffer: Vec<u8>,
    phase: Phase,
    /// Whether the sink holds an open part.
    part_open: bool,
    /// Whether the terminal delimiter was seen.
    terminated: bool,
}

impl MultipartDecoder {
    /// Create a decoder for the given boundary (without leading `--`).
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(CLOSE_SUFFIX);
        delimiter.extend_from_slice(boundary.as_bytes());

        Self {
            delimiter,
            buffer: Vec::new(),
            phase: Phase::SeekingBoundary,
            part_open: false,
            terminated: false,
        }
    }

    /// Create a decoder from a request's `Content-Type` value.
    pub fn from_content_type(content_type: &str) -> Result<Self> {
        extract_boundary(content_type).map(|boundary| Self::new(&boundary))
    }

    /// Reserve room for chunks of up to `chunk_size` bytes.
    pub fn with_chunk_capacity(mut self, chunk_size: usize) -> Self {
        self.buffer
            .reserve(chunk_size + self.delimiter.len() + LINE_END.len());
        self
    }

    /// The delimiter bytes (`--boundary`).
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of bytes carried over to the next chunk.
    pub fn retained(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the terminal delimiter has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Process one received chunk.
    ///
    /// Bytes after the terminal delimiter are ignored. An error means the
    /// body cannot be decoded further; the caller should [`finish`](Self::finish).
    pub fn feed<S: PartSink>(&mut self, chunk: &[u8], sink: &mut S) -> Result<()> {
        if self.phase == Phase::Finished {
            return Ok(());
        }

        self.buffer.extend_from_slice(chunk);

        loop {
            let progressed = match self.phase {
                Phase::SeekingBoundary => self.seek_boundary(),
                Phase::ParsingHeaders => self.parse_headers(sink)?,
                Phase::StreamingBody => self.stream_body(sink),
                Phase::Finished => false,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// End of input. Discards a part that never reached its delimiter.
    ///
    /// Returns whether the body was properly terminated.
    pub fn finish<S: PartSink>(&mut self, sink: &mut S) -> bool {
        if self.part_open {
            sink.discard_part();
            self.part_open = false;
        }
        self.buffer.clear();
        self.phase = Phase::Finished;
        self.terminated
    }

    fn seek_boundary(&mut self) -> bool {
        let Some(pos) = find(&self.buffer, &self.delimiter) else {
            // Keep a possible delimiter prefix split across reads
            let keep = self.delimiter.len();
            if self.buffer.len() > keep {
                self.buffer.drain(..self.buffer.len() - keep);
            }
            return false;
        };

        let after = pos + self.delimiter.len();
        if self.buffer.len() < after + CLOSE_SUFFIX.len() {
            // Cannot tell an interior delimiter from the terminal one yet
            self.buffer.drain(..pos);
            return false;
        }

        if &self.buffer[after..after + CLOSE_SUFFIX.len()] == CLOSE_SUFFIX {
            self.terminated = true;
            self.phase = Phase::Finished;
            self.buffer.clear();
            return false;
        }

        self.buffer.drain(..after);
        self.phase = Phase::ParsingHeaders;
        true
    }

    fn parse_headers<S: PartSink>(&mut self, sink: &mut S) -> Result<bool> {
        let Some(end) = find(&self.buffer, HEADER_TERMINATOR) else {
            if self.buffer.len() > MAX_HEADER_LEN {
                self.buffer.clear();
                self.phase = Phase::Finished;
                return Err(ProtocolError::HeaderTooLarge {
                    max: MAX_HEADER_LEN,
                });
            }
            return Ok(false);
        };

        let filename = parse_filename(&self.buffer[..end]);
        self.buffer.drain(..end + HEADER_TERMINATOR.len());

        self.part_open = match filename {
            Some(name) => sink.open_part(&name),
            None => false,
        };
        self.phase = Phase::StreamingBody;
        Ok(true)
    }

    fn stream_body<S: PartSink>(&mut self, sink: &mut S) -> bool {
        match find(&self.buffer, &self.delimiter) {
            Some(pos) => {
                let content_end = if self.buffer[..pos].ends_with(LINE_END) {
                    pos - LINE_END.len()
                } else {
                    pos
                };

                if self.part_open
                    && content_end > 0
                    && !sink.write_part(&self.buffer[..content_end])
                {
                    self.part_open = false;
                }
                if self.part_open {
                    sink.close_part();
                    self.part_open = false;
                }

                self.buffer.drain(..pos);
                self.phase = Phase::SeekingBoundary;
                true
            }
            None => {
                let withheld = self.delimiter.len() + LINE_END.len();
                let safe = self.buffer.len().saturating_sub(withheld);
                if safe > 0 {
                    if self.part_open && !sink.write_part(&self.buffer[..safe]) {
                        self.part_open = false;
                    }
                    self.buffer.drain(..safe);
                }
                false
            }
        }
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
