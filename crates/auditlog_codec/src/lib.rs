//! # auditlog codec
//!
//! Stateless compression and authenticated encryption for audit log batches.
//!
//! This crate provides:
//! - zlib compression with uniform length-prefixed framing
//! - AES-256-GCM encryption with caller-supplied IVs
//! - [`BatchCodec`], the configured pipeline used by the writer pool
//!
//! All stages are deterministic round-trips: for every input `x`, key `k`,
//! and IV `iv`, `decompress(compress(x)) == x` and
//! `decrypt(encrypt(x, k, iv), k, iv) == x`. When compression or encryption
//! is disabled, the corresponding stage degrades to an identity transform
//! behind the same outer length prefix so frame layouts never change shape.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod compress;
mod crypto;
mod error;

pub use batch::BatchCodec;
pub use compress::{compress, compress_stored, decompress, decompress_stored, LEN_PREFIX_SIZE};
pub use crypto::{decrypt, encrypt, EncryptionKey, IV_SIZE, KEY_SIZE, TAG_SIZE};
pub use error::{CodecError, CodecResult};
