//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every failure the wire layer can report.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The content type carries no `boundary=` parameter.
    #[error("boundary not found in content type: {0}")]
    MissingBoundary(String),

    /// The boundary parameter is longer than the decoder supports.
    #[error("boundary too long: {len} bytes exceeds maximum of {max} bytes")]
    BoundaryTooLong {
        /// Actual boundary length.
        len: usize,
        /// Maximum supported length.
        max: usize,
    },

    /// A part's header block never terminated within the allowed size.
    #[error("part header block too large: more than {max} bytes without a blank line")]
    HeaderTooLarge {
        /// Maximum header block size.
        max: usize,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
