//! Error types for codec operations.

use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding a batch payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An I/O error from the underlying compressor.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input does not follow the expected framing.
    #[error("malformed payload: {message}")]
    Malformed {
        /// Description of the framing violation.
        message: String,
    },

    /// Authentication failed during decryption.
    ///
    /// The payload was tampered with, or the key or IV does not match the
    /// one used for encryption.
    #[error("authentication failed: tag mismatch")]
    Authentication,

    /// A key of the wrong length was supplied.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Encryption was requested but no key was configured.
    #[error("encryption enabled but no key configured")]
    MissingKey,

    /// The input exceeds the 4 GiB framing limit.
    #[error("payload too large: {len} bytes")]
    PayloadTooLarge {
        /// Length of the offending input.
        len: usize,
    },
}

impl CodecError {
    /// Creates a malformed-payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
