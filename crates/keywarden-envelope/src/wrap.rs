//! Key wrapping via X25519 key agreement.
//!
//! A secret (a group private key, a resource content key) is wrapped for a
//! recipient by agreeing a one-time key between a fresh ephemeral keypair and
//! the recipient's public key. Each wrap uses a new ephemeral key, so two
//! wraps of the same secret share nothing.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{
    EncryptionKey, EncryptionNonce, EphemeralKeyPair, X25519PublicKey, X25519StaticSecret,
    KEY_SIZE,
};
use crate::error::{EnvelopeError, Result};

/// A secret encrypted to a single recipient's X25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedSecret {
    /// The secret, encrypted with the derived wrapping key (includes tag).
    pub ciphertext: Vec<u8>,

    /// Nonce used for encryption.
    pub nonce: EncryptionNonce,

    /// Ephemeral X25519 public key (sender's side of ECDH).
    pub ephemeral_public: X25519PublicKey,
}

/// Binds the wrapping key to both ends of the key agreement.
fn wrap_context(ephemeral: &X25519PublicKey, recipient: &X25519PublicKey) -> [u8; 2 * KEY_SIZE] {
    let mut context = [0u8; 2 * KEY_SIZE];
    context[..KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    context[KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    context
}

impl WrappedSecret {
    /// Wrap `secret` so that only the holder of `recipient_public`'s private
    /// key can recover it.
    pub fn wrap(secret: &[u8], recipient_public: &X25519PublicKey) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let shared = ephemeral.diffie_hellman(recipient_public)?;
        let wrap_key = shared.derive_encryption_key(&wrap_context(&ephemeral_public, recipient_public));

        let nonce = EncryptionNonce::generate();
        let ciphertext = wrap_key.encrypt(secret, &nonce)?;

        Ok(Self {
            ciphertext,
            nonce,
            ephemeral_public,
        })
    }

    /// Recover the wrapped secret with the recipient's private key.
    ///
    /// Fails with [`EnvelopeError::DecryptionFailed`] if the key is wrong or
    /// any field was tampered with.
    pub fn unwrap(&self, recipient_secret: &X25519StaticSecret) -> Result<Zeroizing<Vec<u8>>> {
        let recipient_public = recipient_secret.public_key();

        // A tampered ephemeral key may land on a low-order point; that is an
        // authentication failure from the caller's point of view.
        let shared = recipient_secret
            .diffie_hellman(&self.ephemeral_public)
            .map_err(|_| EnvelopeError::DecryptionFailed)?;
        let wrap_key =
            shared.derive_encryption_key(&wrap_context(&self.ephemeral_public, &recipient_public));

        wrap_key.decrypt(&self.ciphertext, &self.nonce)
    }

    /// Unwrap a 32-byte symmetric key.
    pub fn unwrap_key(&self, recipient_secret: &X25519StaticSecret) -> Result<EncryptionKey> {
        let bytes = self.unwrap(recipient_secret)?;
        EncryptionKey::from_slice(&bytes)
    }

    /// Unwrap an X25519 private key (e.g. a group key wrapped for a member).
    pub fn unwrap_secret_key(&self, recipient_secret: &X25519StaticSecret) -> Result<X25519StaticSecret> {
        let bytes = self.unwrap(recipient_secret)?;
        X25519StaticSecret::from_slice(&bytes)
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

/// Wrap `secret` for a recipient. See [`WrappedSecret::wrap`].
pub fn wrap_for_recipient(secret: &[u8], recipient_public: &X25519PublicKey) -> Result<WrappedSecret> {
    WrappedSecret::wrap(secret, recipient_public)
}
