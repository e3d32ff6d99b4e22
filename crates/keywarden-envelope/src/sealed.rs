//! Symmetrically sealed data.
//!
//! Resource content and password-sealed private keys are stored as a
//! [`SealedData`] value: the ciphertext plus what is needed to open it
//! (assuming the holder has the key).

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{EncryptionKey, EncryptionNonce};
use crate::error::{EnvelopeError, Result};

/// Algorithm identifier for sealed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// Data encrypted under a symmetric key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedData {
    /// Encryption algorithm used.
    pub format: EncryptionFormat,

    /// Nonce used for encryption (unique per seal).
    pub nonce: EncryptionNonce,

    /// The encrypted data (includes authentication tag).
    pub ciphertext: Vec<u8>,
}

impl SealedData {
    /// Encrypt plaintext with the given key under a fresh nonce.
    pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;

        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt with the given key.
    pub fn open(&self, key: &EncryptionKey) -> Result<Zeroizing<Vec<u8>>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| EnvelopeError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }
}

/// Encrypt `data` under `key`.
pub fn symmetric_encrypt(data: &[u8], key: &EncryptionKey) -> Result<SealedData> {
    SealedData::seal(data, key)
}

/// Decrypt `sealed` with `key`.
pub fn symmetric_decrypt(sealed: &SealedData, key: &EncryptionKey) -> Result<Zeroizing<Vec<u8>>> {
    sealed.open(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = EncryptionKey::generate();
        let sealed = symmetric_encrypt(b"hunter2", &key).unwrap();

        assert_eq!(sealed.format, EncryptionFormat::ChaCha20Poly1305);
        assert_eq!(symmetric_decrypt(&sealed, &key).unwrap().as_slice(), b"hunter2");
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = symmetric_encrypt(b"hunter2", &EncryptionKey::generate()).unwrap();

        assert!(matches!(
            sealed.open(&EncryptionKey::generate()),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_nonce_unique_per_seal() {
        let key = EncryptionKey::generate();
        let a = SealedData::seal(b"same", &key).unwrap();
        let b = SealedData::seal(b"same", &key).unwrap();

        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_cbor_roundtrip() {
        let key = EncryptionKey::generate();
        let sealed = SealedData::seal(b"payload", &key).unwrap();

        let restored = SealedData::from_bytes(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, sealed);
        assert_eq!(restored.open(&key).unwrap().as_slice(), b"payload");
    }
}
