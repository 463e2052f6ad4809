//! Centralized error types for inbound.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the inbound library.
#[derive(Error, Debug)]
pub enum InboundError {
    /// The transmission could not be parsed into headers and parts.
    #[error("Failed to parse incoming mail: {0}")]
    Parse(String),

    /// Reading the transmission stream failed.
    #[error("Failed to read incoming mail: {source}")]
    Read { source: std::io::Error },

    /// An attachment part does not declare a filename.
    #[error("Failed to parse attachment filename of part {index}")]
    MissingFilename { index: usize },

    /// A sink failed to store an attachment's content.
    #[error("Failed to store attachment '{filename}' in sink '{sink}': {source}")]
    AttachmentStore {
        sink: String,
        filename: String,
        source: Box<InboundError>,
    },

    /// A sink failed to store the message record.
    #[error("Failed to store message metadata in sink '{sink}': {source}")]
    MessageStore {
        sink: String,
        source: Box<InboundError>,
    },

    /// A storage backend rejected or failed an operation.
    #[error("Storage error: {0}")]
    Sink(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The message record could not be serialized.
    #[error("Failed to serialize message metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, InboundError>`.
pub type Result<T> = std::result::Result<T, InboundError>;

impl InboundError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `InboundError::io`).
impl From<std::io::Error> for InboundError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
