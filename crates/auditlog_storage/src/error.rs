//! Error types for segment storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while writing segment files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The destination name is not a safe relative path.
    #[error("invalid destination {name:?}: {message}")]
    InvalidDestination {
        /// The rejected destination.
        name: String,
        /// Why it was rejected.
        message: String,
    },

    /// A single blob exceeds the 4 GiB frame limit.
    #[error("blob too large for a frame: {len} bytes")]
    BlobTooLarge {
        /// Length of the offending blob.
        len: usize,
    },

    /// The store was constructed with unusable options.
    #[error("invalid store options: {message}")]
    InvalidOptions {
        /// Why the options were rejected.
        message: String,
    },

    /// The store has been closed.
    #[error("segment store is closed")]
    Closed,
}

impl StorageError {
    /// Creates an invalid-destination error.
    pub fn invalid_destination(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDestination {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }
}
