//! Batch compression.
//!
//! Every compression output carries a `u32` little-endian prefix holding the
//! uncompressed length, so the decompressor can allocate exactly once and the
//! identity ("stored") variant used when compression is disabled shares the
//! same outer framing.

use crate::error::{CodecError, CodecResult};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Size of the uncompressed-length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;

fn encode_len(len: usize) -> CodecResult<[u8; LEN_PREFIX_SIZE]> {
    let len = u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge { len })?;
    Ok(len.to_le_bytes())
}

fn decode_len(data: &[u8]) -> CodecResult<usize> {
    if data.len() < LEN_PREFIX_SIZE {
        return Err(CodecError::malformed("missing length prefix"));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize)
}

/// Compresses `data` with zlib.
///
/// Output layout: `uncompressed_len: u32 LE || zlib stream`. Empty input
/// round-trips to empty.
///
/// # Errors
///
/// Returns an error if the input exceeds 4 GiB or the compressor fails.
pub fn compress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + data.len() / 2 + 16);
    out.extend_from_slice(&encode_len(data.len())?);

    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses the output of [`compress`].
///
/// # Errors
///
/// Returns an error if the prefix is missing, the zlib stream is corrupt, or
/// the inflated length does not match the prefix.
pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let plain_len = decode_len(data)?;

    let mut out = Vec::with_capacity(plain_len);
    let mut decoder = ZlibDecoder::new(&data[LEN_PREFIX_SIZE..]);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::malformed(format!("zlib stream: {e}")))?;

    if out.len() != plain_len {
        return Err(CodecError::malformed(format!(
            "inflated length mismatch: expected {plain_len}, got {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Stores `data` uncompressed behind the same length prefix as [`compress`].
///
/// Used when compression is disabled so the pipeline framing stays uniform.
///
/// # Errors
///
/// Returns an error if the input exceeds 4 GiB.
pub fn compress_stored(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + data.len());
    out.extend_from_slice(&encode_len(data.len())?);
    out.extend_from_slice(data);
    Ok(out)
}

/// Inverse of [`compress_stored`].
///
/// # Errors
///
/// Returns an error if the prefix is missing or disagrees with the body
/// length.
pub fn decompress_stored(data: &[u8]) -> CodecResult<Vec<u8>> {
    let plain_len = decode_len(data)?;
    let body = &data[LEN_PREFIX_SIZE..];
    if body.len() != plain_len {
        return Err(CodecError::malformed(format!(
            "stored length mismatch: expected {plain_len}, got {}",
            body.len()
        )));
    }
    Ok(body.to_vec())
}
