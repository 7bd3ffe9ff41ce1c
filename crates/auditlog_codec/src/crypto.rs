//! Authenticated encryption for batch payloads.
//!
//! Batches are sealed with AES-256-GCM. The ciphertext layout is
//! `ct_len: u32 LE || ciphertext || tag (16 bytes)`, mirroring the outer
//! length prefix the compressor uses. IVs are supplied by the caller and must
//! be unique per key; the writer pool derives them from a worker id and a
//! worker-local counter.

use crate::error::{CodecError, CodecResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of a GCM IV in bytes.
pub const IV_SIZE: usize = 12;
/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the ciphertext-length prefix.
const LEN_PREFIX_SIZE: usize = 4;

/// A 256-bit encryption key.
///
/// The key material is zeroized when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CodecError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte array.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

pub(crate) fn build_cipher(key: &EncryptionKey) -> CodecResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CodecError::malformed(format!("failed to create cipher: {e}")))
}

pub(crate) fn encrypt_with(
    cipher: &Aes256Gcm,
    plaintext: &[u8],
    iv: &[u8; IV_SIZE],
) -> CodecResult<Vec<u8>> {
    let nonce = Nonce::from_slice(iv);
    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CodecError::malformed("encryption failed"))?;

    // sealed = ciphertext || tag; the prefix records the ciphertext length
    let ct_len = sealed.len() - TAG_SIZE;
    let ct_len = u32::try_from(ct_len).map_err(|_| CodecError::PayloadTooLarge { len: ct_len })?;

    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + sealed.len());
    out.extend_from_slice(&ct_len.to_le_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub(crate) fn decrypt_with(
    cipher: &Aes256Gcm,
    data: &[u8],
    iv: &[u8; IV_SIZE],
) -> CodecResult<Vec<u8>> {
    if data.len() < LEN_PREFIX_SIZE + TAG_SIZE {
        return Err(CodecError::malformed("sealed payload too short"));
    }
    let ct_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[LEN_PREFIX_SIZE..];
    if body.len() != ct_len + TAG_SIZE {
        return Err(CodecError::malformed(format!(
            "sealed length mismatch: expected {} bytes, got {}",
            ct_len + TAG_SIZE,
            body.len()
        )));
    }

    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, body)
        .map_err(|_| CodecError::Authentication)
}

/// Encrypts `plaintext` with AES-256-GCM.
///
/// Output layout: `ct_len: u32 LE || ciphertext || tag`. The IV must never be
/// reused with the same key.
///
/// # Errors
///
/// Returns an error if the cipher cannot be constructed or the input exceeds
/// the framing limit.
pub fn encrypt(
    plaintext: &[u8],
    key: &EncryptionKey,
    iv: &[u8; IV_SIZE],
) -> CodecResult<Vec<u8>> {
    encrypt_with(&build_cipher(key)?, plaintext, iv)
}

/// Decrypts the output of [`encrypt`] and verifies its authentication tag.
///
/// # Errors
///
/// Returns [`CodecError::Authentication`] if the payload was tampered with or
/// the key/IV is wrong.
pub fn decrypt(data: &[u8], key: &EncryptionKey, iv: &[u8; IV_SIZE]) -> CodecResult<Vec<u8>> {
    decrypt_with(&build_cipher(key)?, data, iv)
}
