//! # Keywarden Envelope
//!
//! Cryptographic primitives for the keywarden access-control engine.
//!
//! ## Key Model
//!
//! Every user, group and the server owns an X25519 keypair. Every resource
//! owns a symmetric content key. Keys reach their holders in layers:
//!
//! 1. **User key**: sealed under a password-derived key ([`PasswordSealedKey`])
//! 2. **Group key**: wrapped once per member with the member's public key
//! 3. **Content key**: wrapped once per group that may read the resource
//!
//! Wrapping ([`wrap_for_recipient`]) uses a fresh ephemeral X25519 key per
//! call, a BLAKE3-derived wrapping key, and ChaCha20-Poly1305.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keywarden_envelope::{generate_keypair, wrap_for_recipient, EncryptionKey};
//!
//! let (group_public, group_secret) = generate_keypair();
//! let content_key = EncryptionKey::generate();
//!
//! let wrapped = wrap_for_recipient(content_key.as_bytes(), &group_public).unwrap();
//! let recovered = wrapped.unwrap_key(&group_secret).unwrap();
//! assert_eq!(recovered.as_bytes(), content_key.as_bytes());
//! ```

pub mod crypto;
pub mod error;
pub mod kdf;
pub mod sealed;
pub mod server;
pub mod wrap;

pub use crypto::{
    generate_keypair, secure_erase, EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey,
    X25519PublicKey, X25519StaticSecret, KEY_SIZE, NONCE_SIZE,
};
pub use error::{EnvelopeError, Result};
pub use kdf::{derive_key, KdfParams, PasswordSealedKey, Salt, SALT_SIZE};
pub use sealed::{symmetric_decrypt, symmetric_encrypt, EncryptionFormat, SealedData};
pub use server::ServerKeys;
pub use wrap::{wrap_for_recipient, WrappedSecret};
