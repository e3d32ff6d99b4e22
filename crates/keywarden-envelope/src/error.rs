//! Error types for the envelope module.

use thiserror::Error;

/// Errors that can occur during envelope operations.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Malformed key, nonce, or input of the wrong length.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Authenticated decryption failed: wrong key, wrong password, or
    /// tampered ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Password-based key derivation failed.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EnvelopeError {
    /// Whether this error means "the caller presented the wrong secret".
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, EnvelopeError::DecryptionFailed)
    }
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
