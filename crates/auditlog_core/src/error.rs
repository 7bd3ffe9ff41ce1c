//! Error types for the audit log engine.

use crate::record::Record;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by engine lifecycle and decode operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] auditlog_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] auditlog_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A serialized record could not be decoded.
    #[error("malformed record: {message}")]
    MalformedRecord {
        /// Description of the framing violation.
        message: String,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        message: String,
    },

    /// The engine is already running.
    #[error("engine already started")]
    AlreadyStarted,

    /// The engine has been stopped and cannot be restarted.
    #[error("engine is stopped")]
    Stopped,

    /// Encryption is enabled but no key was provided at start.
    #[error("encryption enabled but no key provided")]
    MissingKey,

    /// The operation is not implemented.
    #[error("not implemented")]
    NotImplemented,
}

impl CoreError {
    /// Creates a malformed-record error.
    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Why a single append was not accepted.
///
/// The rejected record is handed back so the producer can retry or shed load.
#[derive(Debug, Error)]
pub enum AppendError {
    /// The engine is not accepting records.
    #[error("engine is not accepting records")]
    Rejected(Record),

    /// The queue stayed full past the configured append timeout.
    #[error("append timed out")]
    TimedOut(Record),

    /// The queue has been closed.
    #[error("queue closed")]
    Closed(Record),
}

impl AppendError {
    /// Consumes the error, returning the record that was not enqueued.
    #[must_use]
    pub fn into_record(self) -> Record {
        match self {
            Self::Rejected(record) | Self::TimedOut(record) | Self::Closed(record) => record,
        }
    }
}

/// Why a batch append was not accepted.
///
/// Batch enqueues are all-or-none; the full batch is handed back untouched.
#[derive(Debug, Error)]
pub enum BatchAppendError {
    /// The engine is not accepting records.
    #[error("engine is not accepting records")]
    Rejected(Vec<Record>),

    /// The queue stayed full past the configured append timeout.
    #[error("batch append timed out")]
    TimedOut(Vec<Record>),

    /// The queue has been closed.
    #[error("queue closed")]
    Closed(Vec<Record>),

    /// The batch is larger than the queue capacity and can never fit.
    #[error("batch exceeds queue capacity")]
    Oversized(Vec<Record>),
}

impl BatchAppendError {
    /// Consumes the error, returning the records that were not enqueued.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Rejected(records)
            | Self::TimedOut(records)
            | Self::Closed(records)
            | Self::Oversized(records) => records,
        }
    }
}
