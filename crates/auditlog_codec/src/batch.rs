//! The batch encoding pipeline.
//!
//! A [`BatchCodec`] turns a concatenated batch of serialized records into the
//! payload stored inside one on-disk frame, and back:
//!
//! ```text
//! payload = iv (12 bytes) || seal(stage(batch_bytes))
//! ```
//!
//! where `stage` is zlib compression or the stored (identity) framing, and
//! `seal` is AES-256-GCM or the stored framing, depending on configuration.
//! The IV always leads the payload, even with encryption disabled, so a
//! reader never has to consult the configuration to find field boundaries.

use crate::compress::{compress, compress_stored, decompress, decompress_stored};
use crate::crypto::{build_cipher, decrypt_with, encrypt_with, EncryptionKey, IV_SIZE};
use crate::error::{CodecError, CodecResult};
use aes_gcm::Aes256Gcm;

/// Configured encoder/decoder for batch payloads.
///
/// Stateless across calls: the only retained state is the configuration and
/// the expanded cipher key schedule.
pub struct BatchCodec {
    use_compression: bool,
    cipher: Option<Aes256Gcm>,
}

impl BatchCodec {
    /// Creates a codec for the given pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingKey`] if `use_encryption` is set without
    /// a key.
    pub fn new(
        use_compression: bool,
        use_encryption: bool,
        key: Option<&EncryptionKey>,
    ) -> CodecResult<Self> {
        let cipher = if use_encryption {
            let key = key.ok_or(CodecError::MissingKey)?;
            Some(build_cipher(key)?)
        } else {
            None
        };
        Ok(Self {
            use_compression,
            cipher,
        })
    }

    /// Returns whether payloads are compressed.
    #[must_use]
    pub fn compresses(&self) -> bool {
        self.use_compression
    }

    /// Returns whether payloads are encrypted.
    #[must_use]
    pub fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encodes a batch into a frame payload.
    ///
    /// `iv` must be unique per key across the key's lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if a pipeline stage fails or the batch exceeds the
    /// framing limit.
    pub fn encode(&self, batch_bytes: &[u8], iv: &[u8; IV_SIZE]) -> CodecResult<Vec<u8>> {
        let staged = if self.use_compression {
            compress(batch_bytes)?
        } else {
            compress_stored(batch_bytes)?
        };

        let sealed = match &self.cipher {
            Some(cipher) => encrypt_with(cipher, &staged, iv)?,
            None => compress_stored(&staged)?,
        };

        let mut payload = Vec::with_capacity(IV_SIZE + sealed.len());
        payload.extend_from_slice(iv);
        payload.extend_from_slice(&sealed);
        Ok(payload)
    }

    /// Decodes a frame payload back into batch bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on framing violations or authentication failure.
    pub fn decode(&self, payload: &[u8]) -> CodecResult<Vec<u8>> {
        if payload.len() < IV_SIZE {
            return Err(CodecError::malformed("payload shorter than IV"));
        }
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&payload[..IV_SIZE]);
        let sealed = &payload[IV_SIZE..];

        let staged = match &self.cipher {
            Some(cipher) => decrypt_with(cipher, sealed, &iv)?,
            None => decompress_stored(sealed)?,
        };

        if self.use_compression {
            decompress(&staged)
        } else {
            decompress_stored(&staged)
        }
    }
}

impl std::fmt::Debug for BatchCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCodec")
            .field("use_compression", &self.use_compression)
            .field("use_encryption", &self.cipher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[0x42u8; KEY_SIZE]).unwrap()
    }

    fn codecs() -> Vec<BatchCodec> {
        vec![
            BatchCodec::new(false, false, None).unwrap(),
            BatchCodec::new(true, false, None).unwrap(),
            BatchCodec::new(false, true, Some(&key())).unwrap(),
            BatchCodec::new(true, true, Some(&key())).unwrap(),
        ]
    }

    #[test]
    fn roundtrip_all_configurations() {
        let batch = b"record-1|record-2|record-3".repeat(20);
        let iv = [9u8; IV_SIZE];

        for codec in codecs() {
            let payload = codec.encode(&batch, &iv).unwrap();
            assert_eq!(&payload[..IV_SIZE], &iv);
            assert_eq!(codec.decode(&payload).unwrap(), batch);
        }
    }

    #[test]
    fn roundtrip_empty_batch() {
        let iv = [0u8; IV_SIZE];
        for codec in codecs() {
            let payload = codec.encode(b"", &iv).unwrap();
            assert_eq!(codec.decode(&payload).unwrap(), Vec::<u8>::new());
        }
    }

    #[test]
    fn encryption_without_key_is_rejected() {
        assert!(matches!(
            BatchCodec::new(false, true, None),
            Err(CodecError::MissingKey)
        ));
    }

    #[test]
    fn tampered_encrypted_payload_fails() {
        let codec = BatchCodec::new(true, true, Some(&key())).unwrap();
        let mut payload = codec.encode(b"batch", &[3u8; IV_SIZE]).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x80;
        assert!(matches!(
            codec.decode(&payload),
            Err(CodecError::Authentication)
        ));
    }

    #[test]
    fn short_payload_fails() {
        let codec = BatchCodec::new(false, false, None).unwrap();
        assert!(matches!(
            codec.decode(&[0u8; 5]),
            Err(CodecError::Malformed { .. })
        ));
    }
}
