//! The server keypair.
//!
//! Background share processes run without any user's password, so the acting
//! user's group keys are escrowed to the server's public key for the lifetime
//! of the process. The keypair is built once at startup and passed to
//! whoever needs it.

use std::fmt;

use crate::crypto::{X25519PublicKey, X25519StaticSecret};
use crate::error::Result;
use crate::wrap::WrappedSecret;

/// The server's X25519 keypair.
pub struct ServerKeys {
    secret: X25519StaticSecret,
    public: X25519PublicKey,
}

impl ServerKeys {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        Self::from_secret(X25519StaticSecret::generate())
    }

    /// Build from a persisted secret.
    pub fn from_secret(secret: X25519StaticSecret) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Wrap a group private key for the server.
    pub fn escrow(&self, group_secret: &X25519StaticSecret) -> Result<WrappedSecret> {
        WrappedSecret::wrap(group_secret.to_bytes().as_slice(), &self.public)
    }

    /// Recover an escrowed group private key.
    pub fn open_escrow(&self, escrowed: &WrappedSecret) -> Result<X25519StaticSecret> {
        escrowed.unwrap_secret_key(&self.secret)
    }
}

impl fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeys")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnvelopeError;

    #[test]
    fn test_escrow_roundtrip() {
        let server = ServerKeys::generate();
        let group_secret = X25519StaticSecret::generate();

        let escrowed = server.escrow(&group_secret).unwrap();
        let opened = server.open_escrow(&escrowed).unwrap();

        assert_eq!(opened.public_key(), group_secret.public_key());
    }

    #[test]
    fn test_other_server_cannot_open() {
        let escrowed = ServerKeys::generate()
            .escrow(&X25519StaticSecret::generate())
            .unwrap();

        assert!(matches!(
            ServerKeys::generate().open_escrow(&escrowed),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let server = ServerKeys::generate();
        let rendered = format!("{:?}", server);

        assert!(rendered.contains("public"));
        assert!(!rendered.contains("secret"));
    }
}
