//! Response formatting and the gateway error type.
//!
//! Handlers return [`GatewayError`] for anything that goes wrong before the
//! response starts; [`send_error`] turns it into the JSON error envelope with
//! the status fixed by its [`ErrorKind`]. Storage error codes are logged here
//! and never reach the client.

use std::io;

use protocol::{ErrorBody, ErrorKind, ProtocolError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::files::dirs::ProtectedPathError;
use crate::files::path::PathError;
use crate::network::Transport;

/// Headers attached to every response.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

/// Failure of a request, before any response bytes were sent.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or invalid parameter, malformed body or protected path.
    #[error("{0}")]
    BadRequest(String),

    /// The addressed file, directory or route does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Known route, wrong method.
    #[error("{0}")]
    MethodNotAllowed(String),

    /// The storage layer failed.
    #[error("{message}")]
    Storage {
        message: String,
        #[source]
        source: io::Error,
    },

    /// The request body ended before the declared length was received.
    #[error("File upload incomplete")]
    IncompleteUpload { expected: u64, received: u64 },

    /// Some entries of a directory tree could not be removed.
    #[error("Failed to delete directory completely")]
    IncompleteRemoval { failures: usize },
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GatewayError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        GatewayError::NotFound(message.into())
    }

    pub fn storage(message: impl Into<String>, source: io::Error) -> Self {
        GatewayError::Storage {
            message: message.into(),
            source,
        }
    }

    /// Map an I/O error: `NotFound` becomes a 404 with `missing`, anything
    /// else a storage failure with `failure`.
    pub fn from_io(source: io::Error, missing: &str, failure: &str) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            GatewayError::not_found(missing)
        } else {
            GatewayError::storage(failure, source)
        }
    }

    /// Failure category, which fixes the HTTP status.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadRequest(_) => ErrorKind::BadRequest,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            GatewayError::Storage { .. }
            | GatewayError::IncompleteUpload { .. }
            | GatewayError::IncompleteRemoval { .. } => ErrorKind::StorageFailure,
        }
    }
}

impl From<PathError> for GatewayError {
    fn from(err: PathError) -> Self {
        GatewayError::BadRequest(format!("Invalid path: {}", err))
    }
}

impl From<ProtocolError> for GatewayError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MissingBoundary(_) => {
                GatewayError::bad_request("Boundary not found in Content-Type")
            }
            other => GatewayError::BadRequest(other.to_string()),
        }
    }
}

impl From<ProtectedPathError> for GatewayError {
    fn from(_: ProtectedPathError) -> Self {
        GatewayError::bad_request("Cannot delete root directory")
    }
}

/// Attach the CORS headers.
pub fn apply_cors<T: Transport>(transport: &mut T) {
    for (name, value) in CORS_HEADERS {
        transport.set_header(name, value);
    }
}

/// Send `body` as a JSON response with the given status.
pub async fn send_json<T, B>(transport: &mut T, status: u16, body: &B) -> io::Result<()>
where
    T: Transport,
    B: Serialize + ?Sized,
{
    let json = serde_json::to_vec(body).map_err(io::Error::other)?;
    transport.set_status(status);
    transport.set_header("Content-Type", "application/json");
    transport.send(&json).await
}

/// Send the error envelope for `err`.
pub async fn send_error<T: Transport>(transport: &mut T, err: &GatewayError) -> io::Result<()> {
    let kind = err.kind();
    match err {
        GatewayError::Storage { message, source } => {
            error!(
                message = %message,
                error = %source,
                os_error = ?source.raw_os_error(),
                "Storage failure"
            );
        }
        GatewayError::IncompleteUpload { expected, received } => {
            warn!(expected, received, "Upload incomplete");
        }
        GatewayError::IncompleteRemoval { failures } => {
            warn!(failures, "Directory removal incomplete");
        }
        _ => {}
    }

    let body = ErrorBody::new(kind, err.to_string());
    send_json(transport, kind.status(), &body).await
}
