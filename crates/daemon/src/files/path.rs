//! Normalized paths inside the mounted store.
//!
//! Clients address files with slash-separated paths such as `/books/x/a.epub`.
//! A [`StoragePath`] is the validated form of such a path: empty and `.`
//! segments are dropped and `..` segments are rejected, so a path can never
//! leave the mount.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while validating a client path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// The path contains a `..` segment.
    #[error("path traversal detected: {0}")]
    Traversal(String),

    /// A relative name was expected but an absolute path was given.
    #[error("expected a relative name: {0}")]
    Absolute(String),

    /// The path contains a control character or a backslash.
    #[error("invalid character in path: {0}")]
    InvalidCharacter(String),
}

/// A validated path relative to the storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StoragePath {
    segments: Vec<String>,
}

impl StoragePath {
    /// The storage root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a client-supplied path. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        Self::push_segments(&mut segments, raw)?;
        Ok(Self { segments })
    }

    /// Resolve a relative name (which may contain subdirectories) below this path.
    pub fn join(&self, relative: &str) -> Result<Self, PathError> {
        if relative.starts_with('/') {
            return Err(PathError::Absolute(relative.to_string()));
        }
        let mut segments = self.segments.clone();
        Self::push_segments(&mut segments, relative)?;
        Ok(Self { segments })
    }

    fn push_segments(segments: &mut Vec<String>, raw: &str) -> Result<(), PathError> {
        if raw.chars().any(|c| c == '\\' || c.is_control()) {
            return Err(PathError::InvalidCharacter(raw.to_string()));
        }
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(PathError::Traversal(raw.to_string())),
                name => segments.push(name.to_string()),
            }
        }
        Ok(())
    }

    /// Whether this is the storage root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The containing directory, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    /// Final segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Every non-root prefix from the shallowest to the path itself.
    ///
    /// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
    pub fn prefixes(&self) -> impl Iterator<Item = StoragePath> + '_ {
        (1..=self.segments.len()).map(|len| Self {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// Host-relative form, to be joined onto the mount root.
    pub fn to_relative(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
