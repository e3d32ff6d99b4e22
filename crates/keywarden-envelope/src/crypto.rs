//! Cryptographic building blocks.
//!
//! Provides X25519 key agreement and ChaCha20-Poly1305 authenticated encryption.
//! Every secret-bearing type zeroizes itself on drop.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{EnvelopeError, Result};

/// Size of X25519 keys and symmetric keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; KEY_SIZE]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            EnvelopeError::Crypto(format!(
                "invalid public key length: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Convert to x25519-dalek PublicKey.
    pub fn to_dalek(&self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &self.to_hex()[..16])
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// An X25519 static secret key.
///
/// The inner `StaticSecret` zeroizes itself when dropped.
#[derive(Clone)]
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(&mut bytes[..]);
        Self(StaticSecret::from(*bytes))
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Create from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(EnvelopeError::Crypto(format!(
                "invalid secret key length: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = Zeroizing::new([0u8; KEY_SIZE]);
        arr.copy_from_slice(bytes);
        Ok(Self(StaticSecret::from(*arr)))
    }

    /// Export the raw secret bytes, wrapped so they are erased on drop.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    /// Perform key agreement with a peer's public key.
    ///
    /// Fails if the peer key is a low-order point (the shared secret would be
    /// all zeros).
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> Result<SharedKey> {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        if !shared.was_contributory() {
            return Err(EnvelopeError::Crypto("non-contributory public key".into()));
        }
        Ok(SharedKey(*shared.as_bytes()))
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Secret(pub={:?})", self.public_key())
    }
}

/// Generate a fresh X25519 keypair.
pub fn generate_keypair() -> (X25519PublicKey, X25519StaticSecret) {
    let secret = X25519StaticSecret::generate();
    (secret.public_key(), secret)
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive an encryption key from this shared secret.
    ///
    /// BLAKE3 in key-derivation mode gives domain separation from any other
    /// use of the same shared secret.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        let mut hasher = blake3::Hasher::new_derive_key("keywarden-envelope-v1 wrap");
        hasher.update(&self.0);
        hasher.update(context);
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit symmetric encryption key for ChaCha20-Poly1305.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        let key = Self(bytes);
        bytes.zeroize();
        key
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(EnvelopeError::Crypto(format!(
                "invalid key length: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encrypt data with this key.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| EnvelopeError::Crypto(e.to_string()))
    }

    /// Decrypt data with this key.
    ///
    /// The plaintext is returned in a buffer that is erased on drop.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| EnvelopeError::DecryptionFailed)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; NONCE_SIZE]);

impl EncryptionNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Perform key agreement with a peer's public key.
    ///
    /// Consumes the ephemeral secret (can only be used once).
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> Result<SharedKey> {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        if !shared.was_contributory() {
            return Err(EnvelopeError::Crypto("non-contributory public key".into()));
        }
        Ok(SharedKey(*shared.as_bytes()))
    }
}

/// Overwrite a buffer holding key material with zeros.
///
/// Key types in this crate already erase themselves on drop; this is for
/// plain byte buffers that held a secret.
pub fn secure_erase(buffer: &mut [u8]) {
    buffer.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_key_agreement() {
        let (alice_public, alice_secret) = generate_keypair();
        let (bob_public, bob_secret) = generate_keypair();

        let alice_shared = alice_secret.diffie_hellman(&bob_public).unwrap();
        let bob_shared = bob_secret.diffie_hellman(&alice_public).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_ephemeral_key_agreement() {
        let bob_secret = X25519StaticSecret::generate();
        let bob_public = bob_secret.public_key();

        let alice_ephemeral = EphemeralKeyPair::generate();
        let alice_ephemeral_public = alice_ephemeral.public_key();

        let alice_shared = alice_ephemeral.diffie_hellman(&bob_public).unwrap();
        let bob_shared = bob_secret.diffie_hellman(&alice_ephemeral_public).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let secret = X25519StaticSecret::generate();
        let zero_point = X25519PublicKey::from_bytes([0u8; KEY_SIZE]);

        assert!(matches!(
            secret.diffie_hellman(&zero_point),
            Err(EnvelopeError::Crypto(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();
        let plaintext = b"hello, world!";

        let ciphertext = key.encrypt(plaintext, &nonce).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = key.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();

        let ciphertext = key1.encrypt(b"secret", &nonce).unwrap();

        assert!(matches!(
            key2.decrypt(&ciphertext, &nonce),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_key_derivation_different_contexts() {
        let shared = SharedKey([0x42; KEY_SIZE]);

        let key1 = shared.derive_encryption_key(b"context-a");
        let key2 = shared.derive_encryption_key(b"context-b");
        let key1_again = shared.derive_encryption_key(b"context-a");

        assert_ne!(key1.as_bytes(), key2.as_bytes());
        assert_eq!(key1.as_bytes(), key1_again.as_bytes());
    }

    #[test]
    fn test_secret_slice_roundtrip() {
        let secret = X25519StaticSecret::generate();
        let restored = X25519StaticSecret::from_slice(secret.to_bytes().as_slice()).unwrap();

        assert_eq!(secret.public_key(), restored.public_key());
        assert!(X25519StaticSecret::from_slice(&[1u8; 31]).is_err());
        assert!(EncryptionKey::from_slice(&[1u8; 33]).is_err());
    }

    #[test]
    fn test_secure_erase() {
        let mut buffer = vec![0xaa; 48];
        secure_erase(&mut buffer);
        assert!(buffer.iter().all(|b| *b == 0));
    }
}
