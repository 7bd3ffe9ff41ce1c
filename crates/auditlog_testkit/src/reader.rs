//! Segment read-back for test verification.
//!
//! The production engine deliberately ships no read path (`Engine::export` is
//! a stub), but tests must verify what reached disk. This reader walks a
//! segment file frame by frame, decodes each payload through the batch codec,
//! and yields the records inside.

use auditlog_codec::{BatchCodec, CodecError, EncryptionKey};
use auditlog_core::{CoreError, Record};
use auditlog_storage::FRAME_HEADER_SIZE;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading segments back.
#[derive(Debug, Error)]
pub enum ReadError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A payload failed to decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A record failed to deserialize.
    #[error("record error: {0}")]
    Record(#[from] CoreError),

    /// The file ends mid-frame.
    #[error("truncated frame in {path}")]
    Truncated {
        /// The offending segment file.
        path: PathBuf,
    },
}

/// Reads records back out of segment files.
#[derive(Debug)]
pub struct LogReader {
    codec: BatchCodec,
}

impl LogReader {
    /// Creates a reader matching the engine's pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption is requested without a key.
    pub fn new(
        use_compression: bool,
        use_encryption: bool,
        key: Option<&EncryptionKey>,
    ) -> Result<Self, ReadError> {
        Ok(Self {
            codec: BatchCodec::new(use_compression, use_encryption, key)?,
        })
    }

    /// Creates a reader for an uncompressed, unencrypted engine.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            codec: BatchCodec::new(false, false, None).expect("plain codec"),
        }
    }

    /// Reads every record in one segment file, in on-disk order.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated frames or decode failures.
    pub fn read_segment(&self, path: &Path) -> Result<Vec<Record>, ReadError> {
        let mut records = Vec::new();
        for payload in read_frames(path)? {
            let batch = self.codec.decode(&payload)?;
            append_batch_records(&batch, &mut records)?;
        }
        Ok(records)
    }

    /// Reads an entire segment family (`<stem>_0.log`, `<stem>_1.log`, ...)
    /// in index order.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated frames or decode failures.
    pub fn read_family(&self, base_path: &Path, stem: &str) -> Result<Vec<Record>, ReadError> {
        let mut records = Vec::new();
        for index in 0u64.. {
            let path = base_path.join(format!("{stem}_{index}.log"));
            if !path.exists() {
                break;
            }
            records.extend(self.read_segment(&path)?);
        }
        Ok(records)
    }
}

/// Splits a segment file into its raw frame payloads.
///
/// Payloads are returned verbatim (`iv || sealed batch`); use [`LogReader`]
/// to decode them into records.
///
/// # Errors
///
/// Returns an error if the file cannot be read or ends mid-frame.
pub fn read_frames(path: &Path) -> Result<Vec<Vec<u8>>, ReadError> {
    let data = fs::read(path)?;
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if offset + FRAME_HEADER_SIZE > data.len() {
            return Err(ReadError::Truncated {
                path: path.to_path_buf(),
            });
        }
        let len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += FRAME_HEADER_SIZE;

        if offset + len > data.len() {
            return Err(ReadError::Truncated {
                path: path.to_path_buf(),
            });
        }
        frames.push(data[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(frames)
}

fn append_batch_records(batch: &[u8], out: &mut Vec<Record>) -> Result<(), ReadError> {
    let mut offset = 0usize;
    while offset < batch.len() {
        if offset + 4 > batch.len() {
            return Err(CoreError::malformed_record("truncated record length").into());
        }
        let len = u32::from_le_bytes([
            batch[offset],
            batch[offset + 1],
            batch[offset + 2],
            batch[offset + 3],
        ]) as usize;
        offset += 4;

        if offset + len > batch.len() {
            return Err(CoreError::malformed_record("truncated record body").into());
        }
        out.push(Record::deserialize(&batch[offset..offset + len])?);
        offset += len;
    }
    Ok(())
}
