//! Error types for the orchestration layer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the orchestrator's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while distributing or exchanging particles.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// File discovery found nothing to read.
    #[error("no particle files found for base name {0}")]
    NoInputFiles(PathBuf),

    /// Opening or reading a particle file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A write would pass the end of a wire buffer.
    #[error("wire buffer overflow: {needed} bytes needed at offset {offset}, capacity {capacity}")]
    BufferOverflow {
        /// Write offset
        offset: usize,
        /// Bytes to write
        needed: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// A read would pass the end of the received bytes.
    #[error("wire buffer underflow: {needed} bytes needed at offset {offset}, {available} received")]
    BufferUnderflow {
        /// Read offset
        offset: usize,
        /// Bytes to read
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// Message passing failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
