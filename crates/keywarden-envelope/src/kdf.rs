//! Password-based key derivation.
//!
//! A user's X25519 private key is stored sealed under a key derived from the
//! user's password with Argon2id. The cost parameters come from
//! configuration and must stay fixed for the lifetime of a sealed key.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{EncryptionKey, X25519StaticSecret, KEY_SIZE};
use crate::error::{EnvelopeError, Result};
use crate::sealed::SealedData;

/// Size of a KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests only.
    pub const fn testing() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// A random per-user KDF salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_SIZE]);

impl Salt {
    /// Generate 16 random bytes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Derive a symmetric key from a password. Deterministic for equal inputs.
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<EncryptionKey> {
    let argon2 = params.to_argon2()?;
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut out[..])
        .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;
    Ok(EncryptionKey::from_bytes(*out))
}

/// A secret sealed under a password-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordSealedKey {
    /// Salt fed to the KDF.
    pub salt: Salt,
    /// The sealed secret.
    pub sealed: SealedData,
}

impl PasswordSealedKey {
    /// Seal `secret` under a key derived from `password` with a fresh salt.
    pub fn seal(secret: &[u8], password: &[u8], params: &KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let key = derive_key(password, &salt, params)?;
        let sealed = SealedData::seal(secret, &key)?;
        Ok(Self { salt, sealed })
    }

    /// Open with the password. A wrong password yields
    /// [`EnvelopeError::DecryptionFailed`].
    pub fn open(&self, password: &[u8], params: &KdfParams) -> Result<Zeroizing<Vec<u8>>> {
        let key = derive_key(password, &self.salt, params)?;
        self.sealed.open(&key)
    }

    /// Open and interpret the secret as an X25519 private key.
    pub fn open_secret_key(&self, password: &[u8], params: &KdfParams) -> Result<X25519StaticSecret> {
        let bytes = self.open(password, params)?;
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
